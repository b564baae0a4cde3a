// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::OnceLock;

use regex::Regex;

use super::Dialect;
use crate::types::{Brand, NormalizedRecord, RawMessage};

const MARKERS: [&str; 2] = ["devname=", "devid="];

// Either a double-quoted value (group 2, may hold spaces and commas) or a bare
// value ending at whitespace, comma or quote (group 3).
#[allow(clippy::expect_used)]
fn key_value() -> &'static Regex {
    static KV: OnceLock<Regex> = OnceLock::new();
    KV.get_or_init(|| {
        Regex::new(r#"(\w+)=(?:"([^"]+)"|([^",\s]+))"#).expect("valid forti key=value pattern")
    })
}

/// FortiGate traffic/UTM logs: `devname="FGT" srcip=10.0.0.1 user="jane doe" ...`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Forti;

impl Dialect for Forti {
    fn brand(&self) -> Brand {
        Brand::Forti
    }

    fn matches(&self, lowered: &str) -> bool {
        MARKERS.iter().any(|marker| lowered.contains(marker))
    }

    fn extract(&self, raw: &RawMessage) -> NormalizedRecord {
        let mut record = NormalizedRecord::new(Brand::Forti, raw);
        for caps in key_value().captures_iter(&raw.message) {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map_or("", |m| m.as_str())
                .trim();
            match &caps[1] {
                "devname" => record.dev_name = value.to_string(),
                "devid" => record.dev_id = value.to_string(),
                "srcip" => record.src_ip = value.to_string(),
                "dstip" => record.dst_ip = value.to_string(),
                "srcport" => record.src_port = value.to_string(),
                "dstport" => record.dst_port = value.to_string(),
                "srcintf" => record.src_intf = value.to_string(),
                "hostname" => record.hostname = value.to_string(),
                "url" => record.url = value.to_string(),
                "user" => record.user = value.to_string(),
                "action" => record.action = value.to_string(),
                _ => {}
            }
        }
        // date= and time= are device-local wall clock with no zone attached
        record.timestamp = raw.reported_at();
        record
    }
}
