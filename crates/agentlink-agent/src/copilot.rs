//! Copilot Studio transport.
//!
//! Conversations are addressed through an environment-scoped host derived
//! from the environment id and the Power Platform cloud:
//!
//! ```text
//! https://<prefix>.<suffix>.environment.<cloud api host>
//!     /copilotstudio/dataverse-backed/authenticated/bots/<schema>/conversations[/<id>]
//!     ?api-version=2022-03-01-preview
//! ```
//!
//! Both starting a conversation and asking a question answer with a
//! server-sent event stream of activities.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use agentlink_auth::Credential;
use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::json;
use url::Url;

use crate::activity::RawActivity;
use crate::error::TransportError;
use crate::sse::{activity_stream, sse_events};
use crate::transport::{ActivityStream, AgentTransport, OpenedConversation};

/// API version sent with every request.
pub const API_VERSION: &str = "2022-03-01-preview";

/// Response header carrying the conversation id.
pub const CONVERSATION_ID_HEADER: &str = "x-ms-conversationid";

const USER_AGENT: &str = concat!("agentlink/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Clouds
// ---------------------------------------------------------------------------

/// Power Platform cloud hosting the environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PowerPlatformCloud {
    #[default]
    Prod,
    FirstRelease,
    Preprod,
    Test,
    Dev,
    Exp,
    Prv,
    Local,
    Gov,
    GovFr,
    High,
    DoD,
    Mooncake,
}

impl PowerPlatformCloud {
    pub const ALL: &'static [PowerPlatformCloud] = &[
        PowerPlatformCloud::Prod,
        PowerPlatformCloud::FirstRelease,
        PowerPlatformCloud::Preprod,
        PowerPlatformCloud::Test,
        PowerPlatformCloud::Dev,
        PowerPlatformCloud::Exp,
        PowerPlatformCloud::Prv,
        PowerPlatformCloud::Local,
        PowerPlatformCloud::Gov,
        PowerPlatformCloud::GovFr,
        PowerPlatformCloud::High,
        PowerPlatformCloud::DoD,
        PowerPlatformCloud::Mooncake,
    ];

    /// Configuration name.
    pub fn as_str(self) -> &'static str {
        match self {
            PowerPlatformCloud::Prod => "prod",
            PowerPlatformCloud::FirstRelease => "firstrelease",
            PowerPlatformCloud::Preprod => "preprod",
            PowerPlatformCloud::Test => "test",
            PowerPlatformCloud::Dev => "dev",
            PowerPlatformCloud::Exp => "exp",
            PowerPlatformCloud::Prv => "prv",
            PowerPlatformCloud::Local => "local",
            PowerPlatformCloud::Gov => "gov",
            PowerPlatformCloud::GovFr => "govfr",
            PowerPlatformCloud::High => "high",
            PowerPlatformCloud::DoD => "dod",
            PowerPlatformCloud::Mooncake => "mooncake",
        }
    }

    /// The cloud's Power Platform API host.
    pub fn api_host(self) -> &'static str {
        match self {
            PowerPlatformCloud::Prod | PowerPlatformCloud::FirstRelease => "api.powerplatform.com",
            PowerPlatformCloud::Preprod => "api.preprod.powerplatform.com",
            PowerPlatformCloud::Test => "api.test.powerplatform.com",
            PowerPlatformCloud::Dev => "api.dev.powerplatform.com",
            PowerPlatformCloud::Exp => "api.exp.powerplatform.com",
            PowerPlatformCloud::Prv => "api.prv.powerplatform.com",
            PowerPlatformCloud::Local => "api.powerplatform.localhost",
            PowerPlatformCloud::Gov | PowerPlatformCloud::GovFr => {
                "api.gov.powerplatform.microsoft.us"
            }
            PowerPlatformCloud::High => "api.high.powerplatform.microsoft.us",
            PowerPlatformCloud::DoD => "api.appsplatform.us",
            PowerPlatformCloud::Mooncake => "api.powerplatform.partner.microsoftonline.cn",
        }
    }

    /// How many trailing characters of the environment id form the second
    /// host label.
    fn id_suffix_len(self) -> usize {
        match self {
            PowerPlatformCloud::Prod | PowerPlatformCloud::FirstRelease => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for PowerPlatformCloud {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerPlatformCloud {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase().replace(['-', '_'], "");
        match lowered.as_str() {
            "commercial" | "public" => return Ok(PowerPlatformCloud::Prod),
            "gcc" => return Ok(PowerPlatformCloud::Gov),
            "gcchigh" => return Ok(PowerPlatformCloud::High),
            _ => {}
        }
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == lowered)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|c| c.as_str()).collect();
                format!("unknown Power Platform cloud '{s}', expected one of: {}", known.join(", "))
            })
    }
}

// ---------------------------------------------------------------------------
// Connection settings
// ---------------------------------------------------------------------------

/// Where the agent lives.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub environment_id: String,
    /// Agent schema name (identifier).
    pub schema_name: String,
    pub cloud: PowerPlatformCloud,
    /// Limit on connecting and on each silent gap while reading. A turn that
    /// keeps streaming activities is never cut off.
    pub idle_timeout: Duration,
}

impl ConnectionSettings {
    /// The environment-scoped API host.
    pub fn environment_host(&self) -> Result<String, TransportError> {
        let normalized: String = self
            .environment_id
            .chars()
            .filter(|c| *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();

        let suffix_len = self.cloud.id_suffix_len();
        if normalized.len() <= suffix_len || !normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(TransportError::Endpoint {
                reason: format!("invalid environment id '{}'", self.environment_id),
            });
        }

        let (prefix, suffix) = normalized.split_at(normalized.len() - suffix_len);
        Ok(format!("{prefix}.{suffix}.environment.{}", self.cloud.api_host()))
    }

    /// The conversations endpoint, or one conversation within it.
    pub fn conversations_url(&self, conversation_id: Option<&str>) -> Result<Url, TransportError> {
        if self.schema_name.is_empty() {
            return Err(TransportError::Endpoint {
                reason: "agent schema name is empty".to_string(),
            });
        }

        let host = self.environment_host()?;
        let mut url = Url::parse(&format!("https://{host}/")).map_err(|e| TransportError::Endpoint {
            reason: e.to_string(),
        })?;

        {
            let mut segments = url.path_segments_mut().map_err(|()| TransportError::Endpoint {
                reason: format!("https://{host}/ cannot carry a path"),
            })?;
            segments.pop_if_empty().extend([
                "copilotstudio",
                "dataverse-backed",
                "authenticated",
                "bots",
                self.schema_name.as_str(),
                "conversations",
            ]);
            if let Some(id) = conversation_id {
                segments.push(id);
            }
        }
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        Ok(url)
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// HTTP client for streamed turns: no total deadline, only connect and
/// between-reads limits.
fn http_client(idle_timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(idle_timeout)
        .read_timeout(idle_timeout)
        .build()
}

/// [`AgentTransport`] over the Copilot Studio conversations API.
pub struct CopilotStudioTransport {
    settings: ConnectionSettings,
    client: reqwest::Client,
}

impl CopilotStudioTransport {
    /// Build a transport; the endpoint is validated up front.
    pub fn new(settings: ConnectionSettings) -> Result<Self, TransportError> {
        settings.conversations_url(None)?;
        let client = http_client(settings.idle_timeout)?;
        Ok(Self { settings, client })
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    async fn post(
        &self,
        url: Url,
        credential: &Credential,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, TransportError> {
        tracing::debug!(url = %url, "posting to agent");
        let response = self
            .client
            .post(url)
            .bearer_auth(credential.token())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl AgentTransport for CopilotStudioTransport {
    async fn open_conversation(
        &self,
        credential: &Credential,
    ) -> Result<OpenedConversation, TransportError> {
        let url = self.settings.conversations_url(None)?;
        let response = self
            .post(url, credential, &json!({ "emitStartConversationEvent": true }))
            .await?;

        let header_id = response
            .headers()
            .get(CONVERSATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(String::from);

        let activities: Vec<RawActivity> = activity_stream(sse_events(response.bytes_stream()))
            .try_collect()
            .await?;

        let conversation_id = header_id.or_else(|| {
            activities
                .iter()
                .rev()
                .find_map(|a| a.conversation_id().map(String::from))
        });

        tracing::debug!(
            conversation_id = conversation_id.as_deref().unwrap_or("<none>"),
            activities = activities.len(),
            "conversation opened"
        );
        Ok(OpenedConversation {
            conversation_id,
            activities,
        })
    }

    async fn ask_question(
        &self,
        conversation_id: &str,
        credential: &Credential,
        message: &str,
    ) -> Result<ActivityStream, TransportError> {
        let url = self.settings.conversations_url(Some(conversation_id))?;
        let body = json!({ "activity": RawActivity::user_message(message, conversation_id) });
        let response = self.post(url, credential, &body).await?;
        Ok(activity_stream(sse_events(response.bytes_stream())))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(environment_id: &str, cloud: PowerPlatformCloud) -> ConnectionSettings {
        ConnectionSettings {
            environment_id: environment_id.to_string(),
            schema_name: "cr123_helpdesk".to_string(),
            cloud,
            idle_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn prod_host_uses_two_char_suffix() {
        let host = settings("ABCD-1234", PowerPlatformCloud::Prod)
            .environment_host()
            .unwrap();
        assert_eq!(host, "abcd12.34.environment.api.powerplatform.com");
    }

    #[test]
    fn sovereign_host_uses_one_char_suffix() {
        let host = settings("abcd-1234", PowerPlatformCloud::Gov)
            .environment_host()
            .unwrap();
        assert_eq!(host, "abcd123.4.environment.api.gov.powerplatform.microsoft.us");
    }

    #[test]
    fn invalid_environment_id_is_rejected() {
        for id in ["", "a", "--", "abc/def"] {
            assert!(settings(id, PowerPlatformCloud::Prod).environment_host().is_err(), "{id}");
        }
    }

    #[test]
    fn conversations_url_shape() {
        let s = settings("abcd-1234", PowerPlatformCloud::Prod);
        assert_eq!(
            s.conversations_url(None).unwrap().as_str(),
            "https://abcd12.34.environment.api.powerplatform.com/copilotstudio/dataverse-backed/authenticated/bots/cr123_helpdesk/conversations?api-version=2022-03-01-preview"
        );
        let with_id = s.conversations_url(Some("conv/1")).unwrap();
        assert!(with_id.path().ends_with("/conversations/conv%2F1"));
    }

    #[test]
    fn cloud_parsing() {
        assert_eq!("PROD".parse::<PowerPlatformCloud>().unwrap(), PowerPlatformCloud::Prod);
        assert_eq!("Commercial".parse::<PowerPlatformCloud>().unwrap(), PowerPlatformCloud::Prod);
        assert_eq!("first_release".parse::<PowerPlatformCloud>().unwrap(), PowerPlatformCloud::FirstRelease);
        assert_eq!("DoD".parse::<PowerPlatformCloud>().unwrap(), PowerPlatformCloud::DoD);
        assert!("mars".parse::<PowerPlatformCloud>().unwrap_err().contains("mooncake"));
    }

    #[tokio::test]
    async fn slow_stream_outlives_idle_timeout() {
        use futures::StreamExt;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 2048];
            let _ = socket.read(&mut request).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
            for _ in 0..6 {
                socket
                    .write_all(b"event: activity\ndata: {\"type\":\"typing\"}\n\n")
                    .await
                    .unwrap();
                tokio::time::sleep(Duration::from_millis(400)).await;
            }
            socket
                .write_all(b"event: activity\ndata: {\"type\":\"message\",\"text\":\"done\"}\n\nevent: end\ndata: end\n\n")
                .await
                .unwrap();
        });

        let client = http_client(Duration::from_secs(1)).unwrap();
        let response = client.get(format!("http://{addr}/")).send().await.unwrap();
        let events: Vec<_> = sse_events(response.bytes_stream()).collect().await;
        server.await.unwrap();

        let events: Vec<_> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(events.len(), 7);
        assert!(events[6].data.contains("done"));
    }

    #[test]
    fn transport_rejects_bad_settings_up_front() {
        let mut s = settings("abcd-1234", PowerPlatformCloud::Prod);
        s.schema_name.clear();
        assert!(matches!(
            CopilotStudioTransport::new(s),
            Err(TransportError::Endpoint { .. })
        ));
    }
}
