//! MSA device token acquisition and DPAPI plumbing

pub mod device_token;
pub mod dpapi;

pub use device_token::{
    extract_token_to_file, is_valid_token, DeviceToken, DeviceTokenProvider, TokenOptions,
    FALLBACK_DEVICE_TOKEN,
};
