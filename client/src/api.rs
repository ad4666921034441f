//! HTTP client for the matchmaking backend
//!
//! The backend exposes two GET operations: one creates a matchmaking ticket
//! for the caller's region latencies, the other reports whether that ticket
//! has been placed on a game server yet. Responses are JSON with PascalCase
//! keys. A ticket that is still waiting reports `"NotPlacedYet"` as its
//! player session id.

use log::debug;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Player session id the backend reports while a ticket is still waiting.
pub const NOT_PLACED_YET: &str = "NotPlacedYet";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Response did not contain a ticket id")]
    MissingTicket,
}

/// Measured round trip to one candidate region
#[derive(Debug, Clone, PartialEq)]
pub struct RegionLatency {
    pub region: String,
    pub millis: f64,
}

impl RegionLatency {
    pub fn new(region: impl Into<String>, millis: f64) -> Self {
        Self {
            region: region.into(),
            millis,
        }
    }
}

/// Where a ticket was placed and the token that admits us there
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub ip_address: String,
    pub dns_name: String,
    pub port: u16,
    pub player_session_id: String,
}

impl Placement {
    /// Address to dial: the IP when the backend gave one, otherwise the DNS name.
    pub fn host(&self) -> &str {
        if self.ip_address.is_empty() {
            &self.dns_name
        } else {
            &self.ip_address
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketStatus {
    Pending,
    Placed(Placement),
}

/// The two backend operations the matchmaking state machine needs.
pub trait MatchmakingApi {
    fn request_ticket(&mut self, latencies: &[RegionLatency]) -> Result<String, ApiError>;

    fn poll_ticket(&mut self, ticket_id: &str) -> Result<TicketStatus, ApiError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TicketResponse {
    #[serde(default)]
    ticket_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    players: Vec<PlayerInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PlayerInfo {
    player_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MatchStatusResponse {
    #[serde(default)]
    ip_address: Option<String>,
    #[serde(default)]
    port: u16,
    #[serde(default)]
    player_session_id: String,
    #[serde(default)]
    dns_name: Option<String>,
}

/// Joins latencies as `region_ms_region_ms...` with whole milliseconds.
///
/// Underscores keep the value a single query parameter without escaping.
pub fn latency_query(latencies: &[RegionLatency]) -> String {
    latencies
        .iter()
        .map(|l| format!("{}_{}", l.region, l.millis.round() as i64))
        .collect::<Vec<_>>()
        .join("_")
}

pub fn parse_ticket(body: &str) -> Result<String, ApiError> {
    let response: TicketResponse = serde_json::from_str(body)?;
    debug!(
        "Ticket response: status {:?}, players {:?}",
        response.status,
        response
            .players
            .iter()
            .map(|p| p.player_id.as_str())
            .collect::<Vec<_>>()
    );
    match response.ticket_id {
        Some(ticket_id) if !ticket_id.is_empty() => Ok(ticket_id),
        _ => Err(ApiError::MissingTicket),
    }
}

pub fn parse_status(body: &str) -> Result<TicketStatus, ApiError> {
    let response: MatchStatusResponse = serde_json::from_str(body)?;
    if response.player_session_id == NOT_PLACED_YET {
        return Ok(TicketStatus::Pending);
    }
    Ok(TicketStatus::Placed(Placement {
        ip_address: response.ip_address.unwrap_or_default(),
        dns_name: response.dns_name.unwrap_or_default(),
        port: response.port,
        player_session_id: response.player_session_id,
    }))
}

/// Blocking HTTP implementation with a per-request deadline
pub struct HttpMatchmakingApi {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpMatchmakingApi {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn build_request(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<reqwest::blocking::Request, ApiError> {
        let url = format!("{}/{}", self.endpoint, path);
        Ok(self.client.get(url).query(query).build()?)
    }

    fn get_text(&self, path: &str, query: &[(&str, &str)]) -> Result<String, ApiError> {
        let request = self.build_request(path, query)?;
        debug!("GET {}", request.url());

        let response = self.client.execute(request)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.text()?)
    }
}

impl MatchmakingApi for HttpMatchmakingApi {
    fn request_ticket(&mut self, latencies: &[RegionLatency]) -> Result<String, ApiError> {
        let latencies = latency_query(latencies);
        let body = self.get_text("requestmatchmaking", &[("latencies", latencies.as_str())])?;
        parse_ticket(&body)
    }

    fn poll_ticket(&mut self, ticket_id: &str) -> Result<TicketStatus, ApiError> {
        let body = self.get_text("requestmatchstatus", &[("ticketId", ticket_id)])?;
        parse_status(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_query_format() {
        let latencies = vec![
            RegionLatency::new("us-east-1", 41.6),
            RegionLatency::new("us-west-2", 1000.0),
        ];
        assert_eq!(latency_query(&latencies), "us-east-1_42_us-west-2_1000");
        assert_eq!(latency_query(&[]), "");
    }

    #[test]
    fn test_parse_ticket() {
        let body = r#"{"TicketId":"t-1","Status":"QUEUED","Players":[{"PlayerId":"p-9"}]}"#;
        assert_eq!(parse_ticket(body).unwrap(), "t-1");
    }

    #[test]
    fn test_parse_ticket_without_id() {
        assert!(matches!(
            parse_ticket(r#"{"Status":"FAILED"}"#),
            Err(ApiError::MissingTicket)
        ));
        assert!(matches!(
            parse_ticket("<html>gateway timeout</html>"),
            Err(ApiError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_pending_status() {
        let body = r#"{"IpAddress":"","Port":0,"PlayerSessionId":"NotPlacedYet"}"#;
        assert_eq!(parse_status(body).unwrap(), TicketStatus::Pending);
    }

    #[test]
    fn test_parse_placed_status() {
        let body = r#"{"IpAddress":"10.0.0.7","Port":1935,"PlayerSessionId":"psess-1","DnsName":"ec2-10-0-0-7.compute.amazonaws.com"}"#;
        let TicketStatus::Placed(placement) = parse_status(body).unwrap() else {
            panic!("expected a placement");
        };
        assert_eq!(placement.port, 1935);
        assert_eq!(placement.player_session_id, "psess-1");
        assert_eq!(placement.host(), "10.0.0.7");
    }

    #[test]
    fn test_placement_falls_back_to_dns() {
        let placement = Placement {
            ip_address: String::new(),
            dns_name: "game.example.com".to_string(),
            port: 1935,
            player_session_id: "psess-1".to_string(),
        };
        assert_eq!(placement.host(), "game.example.com");
    }

    #[test]
    fn test_query_values_are_encoded() {
        let api = HttpMatchmakingApi::new("https://api.example.com/Prod", Duration::from_secs(1)).unwrap();

        let poll = api
            .build_request("requestmatchstatus", &[("ticketId", "t 1&x=2")])
            .unwrap();
        assert_eq!(
            poll.url().as_str(),
            "https://api.example.com/Prod/requestmatchstatus?ticketId=t+1%26x%3D2"
        );

        let latencies = latency_query(&[RegionLatency::new("us-east-1", 20.0)]);
        let ticket = api
            .build_request("requestmatchmaking", &[("latencies", latencies.as_str())])
            .unwrap();
        assert_eq!(
            ticket.url().as_str(),
            "https://api.example.com/Prod/requestmatchmaking?latencies=us-east-1_20"
        );
    }

    #[test]
    fn test_endpoint_trailing_slash_is_trimmed() {
        let api = HttpMatchmakingApi::new("https://api.example.com/Prod/", Duration::from_secs(1)).unwrap();
        assert_eq!(api.endpoint, "https://api.example.com/Prod");
    }
}
