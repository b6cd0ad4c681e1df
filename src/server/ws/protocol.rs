use serde::Deserialize;

pub const WS_APP_PROTOCOL: &str = "docsage.v1";

#[derive(Debug, Deserialize, Default)]
pub struct WsIncomingMessage {
    #[serde(rename = "type")]
    pub msg_type: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub source_uri: Option<String>,
}
