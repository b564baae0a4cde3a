// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::OnceLock;

use chrono::NaiveDateTime;
use regex::Regex;

use super::Dialect;
use crate::types::{Brand, NormalizedRecord, RawMessage};

const MARKER: &str = "urlfilterlog";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// Values are unquoted and run to the next comma, so they may contain spaces.
#[allow(clippy::expect_used)]
fn key_value() -> &'static Regex {
    static KV: OnceLock<Regex> = OnceLock::new();
    KV.get_or_init(|| Regex::new(r"(\w+)=([^,]+)").expect("valid ruijie key=value pattern"))
}

/// Ruijie URL-filter logs: `deviceId=RG1,url=example.com,action=1,...`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ruijie;

impl Dialect for Ruijie {
    fn brand(&self) -> Brand {
        Brand::Ruijie
    }

    fn matches(&self, lowered: &str) -> bool {
        lowered.contains(MARKER)
    }

    fn extract(&self, raw: &RawMessage) -> NormalizedRecord {
        let mut record = NormalizedRecord::new(Brand::Ruijie, raw);
        for caps in key_value().captures_iter(&raw.message) {
            let value = caps[2].trim();
            match &caps[1] {
                "deviceId" => record.device_id = value.to_string(),
                "urlCategory" => record.url_category = value.to_string(),
                "srcIpv4" => record.src_ip = value.to_string(),
                "dstIpv4" => record.dst_ip = value.to_string(),
                "srcPort" => record.src_port = value.to_string(),
                "dstPort" => record.dst_port = value.to_string(),
                "srcUser" => record.user = value.to_string(),
                "srcMac" => record.src_mac = value.to_string(),
                "policyName" => record.policy_name = value.to_string(),
                "url" => record.url = value.to_string(),
                "action" => {
                    record.action = if value == "1" { "allowed" } else { "blocked" }.to_string();
                }
                "timestamp" => {
                    if let Ok(t) = NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT) {
                        record.timestamp = Some(t.and_utc());
                    }
                }
                _ => {}
            }
        }
        if record.timestamp.is_none() {
            record.timestamp = raw.reported_at();
        }
        record
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn extract(message: &str) -> NormalizedRecord {
        Ruijie.extract(&RawMessage {
            message: message.to_string(),
            from_host: "172.16.0.1".to_string(),
            time_reported: "2024-05-03T12:00:00Z".to_string(),
            ..RawMessage::default()
        })
    }

    #[test]
    fn test_full_mapping() {
        let record = extract(
            "<134>May  3 12:00:01 RG %URLFILTERLOG: deviceId=RG-EG3000,urlCategory=Search Engines,\
             srcIpv4=192.168.1.20,dstIpv4=142.250.1.1,srcPort=53211,dstPort=443,srcUser=alice,\
             srcMac=aa:bb:cc:dd:ee:ff,policyName=default policy,url=www.google.com,action=1,\
             timestamp=2024-05-03 11:59:58,unknownKey=ignored",
        );
        assert_eq!(record.brand, Brand::Ruijie);
        assert_eq!(record.device_id, "RG-EG3000");
        assert_eq!(record.url_category, "Search Engines");
        assert_eq!(record.src_ip, "192.168.1.20");
        assert_eq!(record.dst_ip, "142.250.1.1");
        assert_eq!(record.src_port, "53211");
        assert_eq!(record.dst_port, "443");
        assert_eq!(record.user, "alice");
        assert_eq!(record.src_mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(record.policy_name, "default policy");
        assert_eq!(record.url, "www.google.com");
        assert_eq!(record.action, "allowed");
        assert_eq!(record.from_host, "172.16.0.1");
        assert_eq!(
            record.timestamp.unwrap().to_rfc3339(),
            "2024-05-03T11:59:58+00:00"
        );
    }

    #[test]
    fn test_action_other_than_one_is_blocked() {
        assert_eq!(extract("urlfilterlog url=a,action=0").action, "blocked");
        assert_eq!(extract("urlfilterlog url=a,action=allow").action, "blocked");
        assert_eq!(extract("urlfilterlog url=a,action= 1 ").action, "allowed");
    }

    #[test]
    fn test_bad_timestamp_falls_back_to_reported_time() {
        let record = extract("urlfilterlog url=a,timestamp=03/05/2024 11:59");
        assert_eq!(
            record.timestamp.unwrap().to_rfc3339(),
            "2024-05-03T12:00:00+00:00"
        );
    }

    #[test]
    fn test_missing_url_is_not_indexable() {
        let record = extract("urlfilterlog deviceId=RG,action=1");
        assert!(record.url.is_empty());
        assert!(!record.is_indexable());
    }
}
