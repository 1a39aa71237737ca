//! Utility functions shared by the API client and the configuration loader.
//!
//! - **URL validation**: base URL checks for the category backend

mod url_validator;

pub use url_validator::{is_loopback, validate_base_url, UrlValidationError};
