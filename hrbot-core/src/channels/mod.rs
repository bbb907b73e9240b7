//! Messaging channels the bot answers on.

pub mod whatsapp;

pub use whatsapp::{
    Inbound, MockWhatsAppHttp, RealWhatsAppHttp, WhatsAppConfig, WhatsAppHttpClient,
    WhatsAppSender, parse_inbound,
};
