//! Concrete collaborators for the intake engine: support answerers, report links, transports.

pub use intake_core::{DocumentRenderer, MessageTransport, SupportDesk};

mod reports;
mod support;
mod whatsapp;

pub use reports::ReportLinks;
pub use support::{ForwardingSupport, RuleBasedSupport};
pub use whatsapp::{render_payload, transport_from_config, LogOnlyTransport, WhatsAppTransport};
