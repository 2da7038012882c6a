//! Ledger domains
//!
//! Each domain shares the same block contract and differs only in payload
//! shape, token prefix, chain partitioning and the summary fields shown by
//! the explorer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// How a domain splits its blocks into chains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainPolicy {
    /// One chain for the whole domain
    Global,
    /// One chain per entity (trip, vehicle)
    PerEntity,
}

/// The five audited event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LedgerDomain {
    /// One block per completed delivery
    DeliveryProof,
    /// One block per telemetry / safety event
    DriverBehavior,
    /// One block per export status or document event
    ExportLogistics,
    /// One block per registration / verification event
    VehicleOwnership,
    /// One block per document handoff
    DocumentTransfer,
}

impl LedgerDomain {
    /// Every domain, in a stable order
    pub const ALL: [LedgerDomain; 5] = [
        LedgerDomain::DeliveryProof,
        LedgerDomain::DriverBehavior,
        LedgerDomain::ExportLogistics,
        LedgerDomain::VehicleOwnership,
        LedgerDomain::DocumentTransfer,
    ];

    /// Chain id prefix
    pub fn slug(&self) -> &'static str {
        match self {
            LedgerDomain::DeliveryProof => "delivery-proof",
            LedgerDomain::DriverBehavior => "driver-behavior",
            LedgerDomain::ExportLogistics => "export-logistics",
            LedgerDomain::VehicleOwnership => "vehicle-ownership",
            LedgerDomain::DocumentTransfer => "document-transfer",
        }
    }

    /// Parse from a chain id prefix
    pub fn from_slug(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.slug() == s)
    }

    /// Prefix of the tokens issued for this domain
    pub fn token_prefix(&self) -> &'static str {
        match self {
            LedgerDomain::DeliveryProof => "POD",
            LedgerDomain::DriverBehavior => "DBE",
            LedgerDomain::ExportLogistics => "EXP",
            LedgerDomain::VehicleOwnership => "VOR",
            LedgerDomain::DocumentTransfer => "TOD",
        }
    }

    /// Chain partitioning
    pub fn chain_policy(&self) -> ChainPolicy {
        match self {
            LedgerDomain::DriverBehavior | LedgerDomain::VehicleOwnership => {
                ChainPolicy::PerEntity
            }
            _ => ChainPolicy::Global,
        }
    }

    /// Payload fields that must be encrypted before hashing
    pub fn sensitive_fields(&self) -> &'static [&'static str] {
        match self {
            LedgerDomain::VehicleOwnership => &["owner_id_number"],
            _ => &[],
        }
    }

    /// Payload fields safe to show in listings
    pub fn summary_fields(&self) -> &'static [&'static str] {
        match self {
            LedgerDomain::DeliveryProof => &[
                "token",
                "delivery_id",
                "order_id",
                "receiver_name",
                "delivered_at",
                "amount",
                "corrects_block",
            ],
            LedgerDomain::DriverBehavior => &[
                "token",
                "trip_id",
                "driver_id",
                "vehicle_id",
                "kind",
                "severity",
                "speed_kmh",
                "recorded_at",
                "corrects_block",
            ],
            LedgerDomain::ExportLogistics => &[
                "token",
                "shipment_id",
                "export_reference",
                "from_status",
                "to_status",
                "document_kind",
                "port",
                "destination_country",
                "corrects_block",
            ],
            LedgerDomain::VehicleOwnership => &[
                "token",
                "vin",
                "plate_number",
                "owner_name",
                "event",
                "verified_by",
                "corrects_block",
            ],
            LedgerDomain::DocumentTransfer => &[
                "token",
                "document_id",
                "document_kind",
                "from_party",
                "to_party",
                "corrects_block",
            ],
        }
    }

    /// Display projection of a payload
    ///
    /// Only whitelisted fields are copied, and any value that carries the
    /// ciphertext marker is dropped.
    pub fn project(&self, payload: &Value) -> Value {
        let mut summary = Map::new();
        for field in self.summary_fields() {
            match payload.get(*field) {
                None | Some(Value::Null) => {}
                Some(Value::String(s)) if crate::crypto::FieldCipher::is_encrypted(s) => {}
                Some(value) => {
                    summary.insert((*field).to_string(), value.clone());
                }
            }
        }
        Value::Object(summary)
    }
}

impl fmt::Display for LedgerDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_slug_round_trip() {
        for domain in LedgerDomain::ALL {
            assert_eq!(LedgerDomain::from_slug(domain.slug()), Some(domain));
        }
        assert_eq!(LedgerDomain::from_slug("payments"), None);
    }

    #[test]
    fn test_token_prefixes_are_distinct() {
        let mut prefixes: Vec<&str> = LedgerDomain::ALL.iter().map(|d| d.token_prefix()).collect();
        prefixes.sort();
        prefixes.dedup();
        assert_eq!(prefixes.len(), LedgerDomain::ALL.len());
    }

    #[test]
    fn test_partition_policy() {
        assert_eq!(LedgerDomain::DeliveryProof.chain_policy(), ChainPolicy::Global);
        assert_eq!(LedgerDomain::DriverBehavior.chain_policy(), ChainPolicy::PerEntity);
        assert_eq!(LedgerDomain::VehicleOwnership.chain_policy(), ChainPolicy::PerEntity);
    }

    #[test]
    fn test_sensitive_fields_never_summarized() {
        assert_eq!(
            LedgerDomain::VehicleOwnership.sensitive_fields(),
            &["owner_id_number"]
        );
        for domain in LedgerDomain::ALL {
            for field in domain.sensitive_fields() {
                assert!(!domain.summary_fields().contains(field));
            }
        }
    }

    #[test]
    fn test_projection_hides_sensitive_fields() {
        let payload = json!({
            "token": "VOR-2026-ABCDEFGH",
            "vin": "1HGCM82633A004352",
            "owner_name": "Grace Hopper",
            "owner_id_number": "enc:v1:AAAA",
            "event": "registered"
        });

        let summary = LedgerDomain::VehicleOwnership.project(&payload);
        assert_eq!(summary["vin"], "1HGCM82633A004352");
        assert!(summary.get("owner_id_number").is_none());
    }

    #[test]
    fn test_projection_drops_encrypted_values_even_if_whitelisted() {
        let payload = json!({"owner_name": "enc:v1:BBBB", "vin": "X"});
        let summary = LedgerDomain::VehicleOwnership.project(&payload);
        assert!(summary.get("owner_name").is_none());
    }
}
