use webrtc::ice::mdns::MulticastDnsMode;

const MDNS_MODE_ENV: &str = "RELAY_WEBRTC_MDNS_MODE";

fn parse_mdns_mode(raw: &str) -> Option<MulticastDnsMode> {
    let value = raw.trim().to_ascii_lowercase();
    match value.as_str() {
        "disabled" | "off" | "false" | "0" => Some(MulticastDnsMode::Disabled),
        "query" | "query_only" | "query-only" => Some(MulticastDnsMode::QueryOnly),
        "gather" | "query_and_gather" | "query-and-gather" | "on" | "true" | "1" => {
            Some(MulticastDnsMode::QueryAndGather)
        }
        _ => None,
    }
}

pub fn mdns_mode_from_env() -> Option<MulticastDnsMode> {
    let raw = std::env::var(MDNS_MODE_ENV).ok()?;
    parse_mdns_mode(&raw)
}

pub fn mdns_mode() -> MulticastDnsMode {
    // QueryOnly resolves .local candidates from browsers without publishing our own
    mdns_mode_from_env().unwrap_or(MulticastDnsMode::QueryOnly)
}

pub fn default_mdns_host_name(viewer_id: &str) -> String {
    format!("{viewer_id}.local")
}
