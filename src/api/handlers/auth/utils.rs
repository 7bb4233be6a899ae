use crate::{api::client_ip::ClientIp, session::ClientInfo};
use axum::http::{header::USER_AGENT, HeaderMap};

const MAX_USER_AGENT_LEN: usize = 512;

pub(crate) fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.chars().take(MAX_USER_AGENT_LEN).collect())
}

pub(crate) fn client_info(headers: &HeaderMap, client_ip: &ClientIp) -> ClientInfo {
    ClientInfo {
        user_agent: extract_user_agent(headers),
        ip: client_ip.known(),
    }
}
