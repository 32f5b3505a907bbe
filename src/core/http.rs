use std::time::Duration;

use reqwest::{
    header::USER_AGENT,
    Client,
    RequestBuilder,
    Response,
    StatusCode,
};

use crate::core::TutorError;

pub fn http_client() -> Result<Client, TutorError> {
    Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| TutorError::Custom(format!("HTTP client build failed: {e}")))
}

/// Adds the bearer token and user agent every cloud call carries.
pub fn authorized(request: RequestBuilder, token: &str) -> RequestBuilder {
    request.bearer_auth(token).header(USER_AGENT, "toeic-tutor/0.1 (+reqwest)")
}

/// Maps a non-success response to the error taxonomy: 401 is an auth failure,
/// anything else a transport failure carrying the body text.
pub async fn ensure_success(resp: Response) -> Result<Response, TutorError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let url = resp.url().to_string();
    let body = resp.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED {
        return Err(TutorError::RemoteAuth(format!("token rejected by {url}")));
    }
    Err(TutorError::RemoteTransport {
        status: status.as_u16(),
        message: format!("HTTP error {status} from {url}: {body}"),
    })
}
