//! Region latency measurement used to rank matchmaking regions.
//!
//! Every region gets one warm-up request, so connection setup and the TLS
//! handshake stay out of the figure, followed by two timed requests whose
//! round trips are averaged. A region that fails any request is recorded with
//! a penalty latency instead of being left out, so it sorts last.

use crate::api::{ApiError, RegionLatency};
use log::{info, warn};
use std::time::{Duration, Instant};

/// Latency reported for a region that could not be reached.
pub const FAILED_PROBE_MILLIS: f64 = 1000.0;
const TIMED_REQUESTS: u32 = 2;

pub trait LatencyProbe {
    /// Issues one request and returns its round trip.
    fn request(&mut self, url: &str) -> Result<Duration, ApiError>;
}

pub struct HttpProbe {
    client: reqwest::blocking::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl LatencyProbe for HttpProbe {
    fn request(&mut self, url: &str) -> Result<Duration, ApiError> {
        let started = Instant::now();
        // Any HTTP answer counts, the status is irrelevant for timing
        self.client.get(url).send()?;
        Ok(started.elapsed())
    }
}

pub fn probe_url(template: &str, region: &str) -> String {
    template.replace("{region}", region)
}

/// Average round trip in milliseconds, or [`FAILED_PROBE_MILLIS`].
pub fn measure_region<P: LatencyProbe + ?Sized>(probe: &mut P, url: &str) -> f64 {
    match average_round_trip(probe, url) {
        Ok(millis) => millis,
        Err(e) => {
            warn!("Error reaching {}: {}, using {} ms", url, e, FAILED_PROBE_MILLIS);
            FAILED_PROBE_MILLIS
        }
    }
}

fn average_round_trip<P: LatencyProbe + ?Sized>(probe: &mut P, url: &str) -> Result<f64, ApiError> {
    probe.request(url)?;

    let mut total = Duration::ZERO;
    for _ in 0..TIMED_REQUESTS {
        total += probe.request(url)?;
    }
    Ok(total.as_secs_f64() * 1000.0 / TIMED_REQUESTS as f64)
}

/// Measures every region in order.
pub fn measure_regions<P: LatencyProbe + ?Sized>(
    probe: &mut P,
    regions: &[String],
    url_template: &str,
) -> Vec<RegionLatency> {
    regions
        .iter()
        .map(|region| {
            let millis = measure_region(probe, &probe_url(url_template, region));
            info!("Latency to {}: {:.1} ms", region, millis);
            RegionLatency::new(region.clone(), millis)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::collections::VecDeque;

    /// Replays scripted round trips and records the requested urls
    struct ScriptedProbe {
        replies: VecDeque<Option<u64>>,
        urls: Vec<String>,
    }

    impl ScriptedProbe {
        fn new(replies: Vec<Option<u64>>) -> Self {
            Self {
                replies: replies.into(),
                urls: Vec::new(),
            }
        }
    }

    impl LatencyProbe for ScriptedProbe {
        fn request(&mut self, url: &str) -> Result<Duration, ApiError> {
            self.urls.push(url.to_string());
            match self.replies.pop_front().flatten() {
                Some(ms) => Ok(Duration::from_millis(ms)),
                None => Err(ApiError::Status {
                    status: 503,
                    body: String::new(),
                }),
            }
        }
    }

    #[test]
    fn test_warm_up_is_excluded_from_average() {
        let mut probe = ScriptedProbe::new(vec![Some(500), Some(40), Some(60)]);
        let millis = measure_region(&mut probe, "https://example.com");

        assert_approx_eq!(millis, 50.0);
        assert_eq!(probe.urls.len(), 3);
    }

    #[test]
    fn test_failed_probe_gets_penalty() {
        let mut probe = ScriptedProbe::new(vec![Some(10), None]);
        assert_eq!(measure_region(&mut probe, "https://example.com"), FAILED_PROBE_MILLIS);

        let mut unreachable = ScriptedProbe::new(vec![None]);
        assert_eq!(measure_region(&mut unreachable, "https://example.com"), FAILED_PROBE_MILLIS);
        assert_eq!(unreachable.urls.len(), 1);
    }

    #[test]
    fn test_regions_keep_order_and_url_template() {
        let mut probe = ScriptedProbe::new(vec![
            Some(1),
            Some(20),
            Some(20),
            None,
        ]);
        let regions = vec!["us-east-1".to_string(), "eu-west-1".to_string()];
        let latencies = measure_regions(&mut probe, &regions, "https://dynamodb.{region}.amazonaws.com");

        assert_eq!(latencies.len(), 2);
        assert_eq!(latencies[0].region, "us-east-1");
        assert_approx_eq!(latencies[0].millis, 20.0);
        assert_eq!(latencies[1].region, "eu-west-1");
        assert_eq!(latencies[1].millis, FAILED_PROBE_MILLIS);
        assert_eq!(probe.urls[0], "https://dynamodb.us-east-1.amazonaws.com");
        assert_eq!(probe.urls[3], "https://dynamodb.eu-west-1.amazonaws.com");
    }
}
