pub mod forward;
pub mod http_result;
pub mod synthetic;
pub mod upgrade;

pub use forward::{build_client, handle_request, HttpClient, ProxyContext, RespBody};
pub use http_result::{HttpError, HttpResult};
pub use synthetic::synthetic_response;
