/// Best-effort IP geolocation for sign-in alerts
use serde::Deserialize;
use std::time::Duration;

pub const UNKNOWN_LOCATION: &str = "Unknown";
pub const LOCAL_LOCATION: &str = "Local access";

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Deserialize)]
struct IpApiResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    isp: String,
}

#[derive(Clone)]
pub struct LocationLookup {
    client: reqwest::Client,
    base_url: String,
}

impl LocationLookup {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Human-readable location, never an error
    pub async fn lookup(&self, ip: &str) -> String {
        if is_local(ip) {
            return LOCAL_LOCATION.to_string();
        }

        let url = format!(
            "{}/json/{}?fields=status,country,city,isp",
            self.base_url,
            urlencoding::encode(ip)
        );

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Location lookup for {} failed: {}", ip, e);
                return UNKNOWN_LOCATION.to_string();
            }
        };

        match response.json::<IpApiResponse>().await {
            Ok(body) => format_location(&body),
            Err(_) => UNKNOWN_LOCATION.to_string(),
        }
    }
}

fn is_local(ip: &str) -> bool {
    matches!(ip, "" | "::1" | "127.0.0.1" | "localhost")
}

fn format_location(body: &IpApiResponse) -> String {
    if body.status != "success" {
        return UNKNOWN_LOCATION.to_string();
    }
    match (body.city.is_empty(), body.country.is_empty()) {
        (false, false) if !body.isp.is_empty() => {
            format!("{}, {} ({})", body.city, body.country, body.isp)
        }
        (false, false) => format!("{}, {}", body.city, body.country),
        (_, false) => body.country.clone(),
        _ => UNKNOWN_LOCATION.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Json, Router};

    fn body(status: &str, country: &str, city: &str, isp: &str) -> IpApiResponse {
        IpApiResponse {
            status: status.into(),
            country: country.into(),
            city: city.into(),
            isp: isp.into(),
        }
    }

    #[test]
    fn test_format_location() {
        assert_eq!(
            format_location(&body("success", "Germany", "Berlin", "DT")),
            "Berlin, Germany (DT)"
        );
        assert_eq!(format_location(&body("success", "Germany", "", "")), "Germany");
        assert_eq!(format_location(&body("fail", "Germany", "Berlin", "")), UNKNOWN_LOCATION);
        assert_eq!(format_location(&body("success", "", "", "")), UNKNOWN_LOCATION);
    }

    #[tokio::test]
    async fn test_local_addresses_skip_lookup() {
        let lookup = LocationLookup::new("http://127.0.0.1:9");
        assert_eq!(lookup.lookup("127.0.0.1").await, LOCAL_LOCATION);
        assert_eq!(lookup.lookup("::1").await, LOCAL_LOCATION);
    }

    #[tokio::test]
    async fn test_lookup_against_local_service() {
        let app = Router::new().route(
            "/json/:ip",
            get(|| async {
                Json(serde_json::json!({
                    "status": "success", "country": "France", "city": "Lyon", "isp": ""
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let lookup = LocationLookup::new(&format!("http://{}", addr));
        assert_eq!(lookup.lookup("198.51.100.4").await, "Lyon, France");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unknown() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let lookup = LocationLookup::new(&format!("http://{}", addr));
        assert_eq!(lookup.lookup("198.51.100.4").await, UNKNOWN_LOCATION);
    }
}
