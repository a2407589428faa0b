//! HTTP side of the agent: the status flag it polls and the endpoint it
//! uploads finished recordings to.

pub mod status;
pub mod upload;

pub use status::{parse_status_body, HttpStatusClient, StatusPoller};
pub use upload::{
    metadata_headers, upload_timeout, HttpUploadClient, PcmFormat, UploadError, Uploader,
    BODY_EXCERPT_LEN,
};
