//! Apple MDM wire types.
//!
//! Everything a device sends or receives is an XML property list; the types
//! here are the serde shapes for those bodies: check-in messages, command
//! payloads, command responses and the enrollment profile payloads.

mod checkin;
mod commands;
mod enroll;
mod response;
mod ser;

pub use checkin::{CheckinMessage, DeviceIdentity, TokenUpdate};
pub use commands::{
    AdminAccount, Command, CommandPayload, InstallApplicationOptions, OsUpdate, Setting,
};
pub use enroll::{
    DepEnrollmentRequest, MdmPayloadContent, OtaEnrollmentRequest, Payload, Profile,
    ProfileServicePayload, ScepPayloadContent,
};
pub use response::{ConnectResponse, ErrorChainItem};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid property list: {0}")]
    Plist(#[from] plist::Error),

    #[error("invalid command request: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported MDM RequestType: {0}")]
    UnsupportedRequestType(String),

    #[error("expected {expected}, got {got} MessageType")]
    UnexpectedMessageType { expected: &'static str, got: String },

    #[error("empty command request")]
    EmptyCommandRequest,
}

/// Serialize a value as an XML property list.
pub fn to_plist_xml<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::new();
    plist::to_writer_xml(&mut buf, value)?;
    Ok(buf)
}
