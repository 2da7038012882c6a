//! Domain payloads
//!
//! Typed events for the five ledgers. Each payload knows its domain, the
//! entity key that selects its chain (for per-entity domains), and which of
//! its fields must be encrypted before the payload is hashed and stored.
//!
//! Corrections are new blocks whose payload sets `corrects_block` to the
//! number of the block being superseded; blocks are never edited.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::FieldCipher;
use crate::domain::{ChainPolicy, LedgerDomain};
use crate::error::{Error, Result};
use crate::types::{Block, ChainId};

/// A payload that can be recorded in a domain ledger
pub trait LedgerPayload: Serialize + DeserializeOwned + Send {
    /// Domain this payload is recorded in
    const DOMAIN: LedgerDomain;

    /// Entity selecting the chain of a per-entity domain
    fn entity_key(&self) -> Option<&str> {
        None
    }

    /// Token already assigned to this payload
    fn token(&self) -> Option<&str>;

    /// Reject payloads that are structurally fine but meaningless
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Encrypt sensitive fields in place
    fn seal(&mut self, _cipher: &FieldCipher) -> Result<()> {
        Ok(())
    }

    /// Chain this payload is appended to
    fn chain_id(&self) -> Result<ChainId> {
        match Self::DOMAIN.chain_policy() {
            ChainPolicy::Global => Ok(ChainId::global(Self::DOMAIN)),
            ChainPolicy::PerEntity => {
                let entity = self.entity_key().ok_or_else(|| {
                    Error::InvalidPayload(format!("{} payload has no entity key", Self::DOMAIN))
                })?;
                ChainId::for_entity(Self::DOMAIN, entity)
            }
        }
    }

    /// Decode the payload of a stored block
    fn from_block(block: &Block) -> Result<Self> {
        if block.chain_id.domain()? != Self::DOMAIN {
            return Err(Error::InvalidChain(format!(
                "block from {} is not a {} payload",
                block.chain_id,
                Self::DOMAIN
            )));
        }
        Ok(serde_json::from_value(block.payload.clone())?)
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidPayload(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// Proof of one completed delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryProof {
    /// Ledger token (`POD-...`), assigned on append
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Delivery record id
    pub delivery_id: Uuid,
    /// Sales order the delivery fulfils
    pub order_id: String,
    /// Person who signed for the goods
    pub receiver_name: String,
    /// Hash of the captured signature image
    pub signature_hash: String,
    /// Delivery coordinates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Longitude of the same point
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// Hashes of proof photos
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photo_hashes: Vec<String>,
    /// Collected amount
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub amount: Option<Decimal>,
    /// When the goods were handed over
    pub delivered_at: DateTime<Utc>,
    /// Free-form remarks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Block superseded by this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrects_block: Option<u64>,
}

impl LedgerPayload for DeliveryProof {
    const DOMAIN: LedgerDomain = LedgerDomain::DeliveryProof;

    fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn validate(&self) -> Result<()> {
        require("order_id", &self.order_id)?;
        require("receiver_name", &self.receiver_name)?;
        require("signature_hash", &self.signature_hash)?;
        if matches!(self.amount, Some(a) if a.is_sign_negative()) {
            return Err(Error::InvalidPayload("amount must not be negative".to_string()));
        }
        Ok(())
    }
}

/// Telemetry or safety event category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorKind {
    /// Hard deceleration
    HarshBraking,
    /// Hard acceleration
    HarshAcceleration,
    /// Above the speed limit
    Speeding,
    /// Cornering at speed
    SharpTurn,
    /// Engine idling too long
    Idling,
    /// Handheld phone use while driving
    PhoneUse,
    /// Driver fatigue alert
    Fatigue,
}

/// Severity of a driver event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational
    Low,
    /// Worth a review
    Medium,
    /// Needs follow-up
    High,
    /// Immediate action required
    Critical,
}

/// One telemetry / safety event of a trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverBehaviorEvent {
    /// Ledger token (`DBE-...`), assigned on append
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Trip the event belongs to; selects the chain
    pub trip_id: String,
    /// Driver involved
    pub driver_id: String,
    /// Vehicle involved
    pub vehicle_id: String,
    /// Event category
    pub kind: BehaviorKind,
    /// Event severity
    pub severity: Severity,
    /// Speed at the time of the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_kmh: Option<f64>,
    /// Event location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Longitude of the same point
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// When the event was recorded
    pub recorded_at: DateTime<Utc>,
    /// Block this event corrects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrects_block: Option<u64>,
}

impl LedgerPayload for DriverBehaviorEvent {
    const DOMAIN: LedgerDomain = LedgerDomain::DriverBehavior;

    fn entity_key(&self) -> Option<&str> {
        Some(&self.trip_id)
    }

    fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn validate(&self) -> Result<()> {
        require("driver_id", &self.driver_id)?;
        require("vehicle_id", &self.vehicle_id)?;
        if matches!(self.speed_kmh, Some(s) if !s.is_finite() || s < 0.0) {
            return Err(Error::InvalidPayload("speed_kmh must be a non-negative number".to_string()));
        }
        Ok(())
    }
}

/// Export shipment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    /// Shipment being prepared
    Draft,
    /// Export documents filed
    DocumentsSubmitted,
    /// Released by customs
    CustomsCleared,
    /// Loaded and departed
    Shipped,
    /// Arrived at the consignee
    Delivered,
    /// Stopped pending inspection or paperwork
    Held,
}

/// Status change or document event of an export shipment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportEvent {
    /// Ledger token (`EXP-...`), assigned on append
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Shipment id
    pub shipment_id: String,
    /// Export permit or declaration reference
    pub export_reference: String,
    /// Status before the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_status: Option<ExportStatus>,
    /// Status after the event
    pub to_status: ExportStatus,
    /// Document submitted with this event, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_kind: Option<String>,
    /// Hash of the attached document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_hash: Option<String>,
    /// Port of loading
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// ISO country code of the destination
    pub destination_country: String,
    /// When the event happened
    pub occurred_at: DateTime<Utc>,
    /// Block this event corrects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrects_block: Option<u64>,
}

impl LedgerPayload for ExportEvent {
    const DOMAIN: LedgerDomain = LedgerDomain::ExportLogistics;

    fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn validate(&self) -> Result<()> {
        require("shipment_id", &self.shipment_id)?;
        require("export_reference", &self.export_reference)?;
        require("destination_country", &self.destination_country)?;
        if self.from_status == Some(self.to_status) && self.document_kind.is_none() {
            return Err(Error::InvalidPayload(
                "status event must change the status".to_string(),
            ));
        }
        if self.document_kind.is_some() != self.document_hash.is_some() {
            return Err(Error::InvalidPayload(
                "document_kind and document_hash go together".to_string(),
            ));
        }
        Ok(())
    }
}

/// Vehicle ownership event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipEvent {
    /// First registration
    Registered,
    /// Ownership moved to a new owner
    Transferred,
    /// Ownership confirmed by a verifier
    Verified,
    /// Registration withdrawn
    Revoked,
}

/// Registration or verification event of one vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRegistration {
    /// Ledger token (`VOR-...`), assigned on append
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Vehicle identification number; selects the chain
    pub vin: String,
    /// Registration plate
    pub plate_number: String,
    /// Registered owner
    pub owner_name: String,
    /// National id of the owner; stored encrypted
    pub owner_id_number: String,
    /// Ownership event
    pub event: OwnershipEvent,
    /// Officer or agency that verified the record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_by: Option<String>,
    /// When the event was recorded
    pub recorded_at: DateTime<Utc>,
    /// Block this event corrects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrects_block: Option<u64>,
}

impl VehicleRegistration {
    /// Plaintext owner id of a stored registration
    pub fn reveal_owner_id(&self, cipher: &FieldCipher) -> Result<String> {
        cipher.decrypt(&self.owner_id_number)
    }
}

impl LedgerPayload for VehicleRegistration {
    const DOMAIN: LedgerDomain = LedgerDomain::VehicleOwnership;

    fn entity_key(&self) -> Option<&str> {
        Some(&self.vin)
    }

    fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn validate(&self) -> Result<()> {
        if self.vin.len() != 17 || !self.vin.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidPayload(format!(
                "vin {:?} must be 17 alphanumeric characters",
                self.vin
            )));
        }
        require("plate_number", &self.plate_number)?;
        require("owner_name", &self.owner_name)?;
        require("owner_id_number", &self.owner_id_number)?;
        if self.event == OwnershipEvent::Verified && self.verified_by.is_none() {
            return Err(Error::InvalidPayload(
                "verification events need verified_by".to_string(),
            ));
        }
        Ok(())
    }

    fn seal(&mut self, cipher: &FieldCipher) -> Result<()> {
        if !FieldCipher::is_encrypted(&self.owner_id_number) {
            self.owner_id_number = cipher.encrypt(&self.owner_id_number)?;
        }
        Ok(())
    }
}

/// Trade document category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Bill of lading
    BillOfLading,
    /// Commercial invoice
    CommercialInvoice,
    /// Packing list
    PackingList,
    /// Certificate of origin
    CertificateOfOrigin,
    /// Customs declaration
    CustomsDeclaration,
    /// Delivery note
    DeliveryNote,
    /// Any other document
    Other,
}

/// Handoff of a document between two parties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentTransfer {
    /// Ledger token (`TOD-...`), assigned on append
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Document id
    pub document_id: Uuid,
    /// Document category
    pub document_kind: DocumentKind,
    /// Hash of the document content at handoff
    pub document_hash: String,
    /// Party handing the document over
    pub from_party: String,
    /// Party receiving the document
    pub to_party: String,
    /// Handoff condition, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// When the handoff happened
    pub transferred_at: DateTime<Utc>,
    /// Block this transfer corrects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrects_block: Option<u64>,
}

impl LedgerPayload for DocumentTransfer {
    const DOMAIN: LedgerDomain = LedgerDomain::DocumentTransfer;

    fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn validate(&self) -> Result<()> {
        require("document_hash", &self.document_hash)?;
        require("from_party", &self.from_party)?;
        require("to_party", &self.to_party)?;
        if self.from_party == self.to_party {
            return Err(Error::InvalidPayload(
                "a document cannot be transferred to its holder".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::str::FromStr;

    fn registration() -> VehicleRegistration {
        VehicleRegistration {
            token: None,
            vin: "1HGCM82633A004352".to_string(),
            plate_number: "KAA 123A".to_string(),
            owner_name: "Grace Hopper".to_string(),
            owner_id_number: "ID-99887766".to_string(),
            event: OwnershipEvent::Registered,
            verified_by: None,
            recorded_at: Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap(),
            corrects_block: None,
        }
    }

    #[test]
    fn test_per_entity_chain_ids() {
        assert_eq!(
            registration().chain_id().unwrap().as_str(),
            "vehicle-ownership/1HGCM82633A004352"
        );
    }

    #[test]
    fn test_seal_encrypts_owner_id_once() {
        let cipher = FieldCipher::generate();
        let mut reg = registration();

        reg.seal(&cipher).unwrap();
        assert!(FieldCipher::is_encrypted(&reg.owner_id_number));
        let sealed = reg.owner_id_number.clone();

        reg.seal(&cipher).unwrap();
        assert_eq!(reg.owner_id_number, sealed);
        assert_eq!(reg.reveal_owner_id(&cipher).unwrap(), "ID-99887766");
    }

    #[test]
    fn test_vin_validation() {
        let mut reg = registration();
        assert!(reg.validate().is_ok());
        reg.vin = "SHORT".to_string();
        assert!(matches!(reg.validate(), Err(Error::InvalidPayload(_))));
    }

    #[test]
    fn test_amount_serializes_as_number() {
        let proof = DeliveryProof {
            token: None,
            delivery_id: Uuid::nil(),
            order_id: "SO-1".to_string(),
            receiver_name: "Ada".to_string(),
            signature_hash: "ab".repeat(32),
            latitude: None,
            longitude: None,
            photo_hashes: Vec::new(),
            amount: Some(Decimal::from_str("22500").unwrap()),
            delivered_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            notes: None,
            corrects_block: None,
        };

        let value = serde_json::to_value(&proof).unwrap();
        assert!(value["amount"].is_number());
        assert!(value.get("token").is_none());
        assert_eq!(proof.chain_id().unwrap().as_str(), "delivery-proof");
    }

    #[test]
    fn test_document_transfer_needs_two_parties() {
        let transfer = DocumentTransfer {
            token: None,
            document_id: Uuid::nil(),
            document_kind: DocumentKind::BillOfLading,
            document_hash: "cd".repeat(32),
            from_party: "Carrier".to_string(),
            to_party: "Carrier".to_string(),
            condition: None,
            transferred_at: Utc::now(),
            corrects_block: None,
        };
        assert!(transfer.validate().is_err());
    }

    #[test]
    fn test_export_event_kinds_use_snake_case() {
        let event: ExportEvent = serde_json::from_value(json!({
            "shipment_id": "SH-1",
            "export_reference": "EXP-REF-1",
            "from_status": "draft",
            "to_status": "customs_cleared",
            "destination_country": "KE",
            "occurred_at": "2026-03-01T12:00:00Z"
        }))
        .unwrap();
        assert_eq!(event.to_status, ExportStatus::CustomsCleared);
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_from_block_checks_domain() {
        let block = crate::block::next_block(
            ChainId::global(LedgerDomain::DeliveryProof),
            None,
            serde_json::to_value(registration()).unwrap(),
        );
        assert!(matches!(
            VehicleRegistration::from_block(&block),
            Err(Error::InvalidChain(_))
        ));
    }
}
