mod documents;
mod error;
mod middleware;

pub use documents::{HttpState, build_router};
pub use error::{ApiError, ApiErrorBody, ApiErrorMessage, codes};
pub use middleware::{REQUEST_ID_HEADER, RequestContext};
