//! Tamper-evident proof documents
//!
//! A proof document is a content-addressed record of one commitment
//! window's billable hours. The canonical structure serializes with a
//! stable field order; its SHA-256 digest is embedded in the rendered
//! document and stored as object metadata, so recomputing the hash from
//! the stored structure must always reproduce the recorded value.

use crate::error::{CoreError, CoreResult};
use crate::governance::{CommitmentWindow, ComplianceState};
use crate::models::Commitment;
use crate::security::sha256_hex;
use crate::types::{CommitmentId, EventId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// One billable event inside a proof document, ordered by start then id
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProofEvent {
    pub event_id: EventId,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub hours: f64,
}

/// Canonical proof structure
///
/// Field order is the canonical serialization order; do not reorder fields
/// without versioning stored proofs.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProofData {
    pub commitment: Commitment,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub actual_hours: f64,
    pub status: ComplianceState,
    pub events: Vec<ProofEvent>,
}

impl ProofData {
    pub fn new(
        commitment: Commitment,
        window: CommitmentWindow,
        actual_hours: f64,
        status: ComplianceState,
        mut events: Vec<ProofEvent>,
    ) -> Self {
        events.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.event_id.cmp(&b.event_id)));
        Self {
            commitment,
            window_start: window.start,
            window_end: window.end,
            actual_hours,
            status,
            events,
        }
    }

    /// Canonical JSON serialization (stable key order)
    pub fn canonical_json(&self) -> CoreResult<String> {
        serde_json::to_string(self).map_err(CoreError::from)
    }

    /// SHA-256 of the canonical serialization, hex encoded
    pub fn proof_hash(&self) -> CoreResult<String> {
        Ok(sha256_hex(self.canonical_json()?.as_bytes()))
    }
}

/// Rendered proof format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProofFormat {
    Pdf,
    Csv,
}

impl ProofFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Csv => "csv",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Csv => "text/csv",
        }
    }
}

impl fmt::Display for ProofFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Object-store key for a rendered proof:
/// `proofs/{user_id}/{commitment_id}/{rendered_at}.{ext}`
pub fn proof_object_key(
    user_id: UserId,
    commitment_id: CommitmentId,
    rendered_at: DateTime<Utc>,
    format: ProofFormat,
) -> String {
    format!(
        "proofs/{user_id}/{commitment_id}/{}.{}",
        rendered_at.format("%Y-%m-%dT%H-%M-%SZ"),
        format.extension()
    )
}

/// Validate that a requested proof key belongs to the caller.
///
/// Returns `NotFound` (not `Forbidden`) on mismatch so foreign keys are
/// indistinguishable from absent ones.
pub fn validate_proof_key(user_id: UserId, key: &str) -> CoreResult<()> {
    if key.contains("..") {
        return Err(CoreError::NotFound("proof not found".to_string()));
    }
    let expected_prefix = format!("proofs/{user_id}/");
    if key.starts_with(&expected_prefix) {
        Ok(())
    } else {
        Err(CoreError::NotFound("proof not found".to_string()))
    }
}

/// Render a proof document in the requested format, embedding `proof_hash`.
pub fn render_proof(data: &ProofData, proof_hash: &str, format: ProofFormat) -> Vec<u8> {
    match format {
        ProofFormat::Csv => render_csv(data, proof_hash).into_bytes(),
        ProofFormat::Pdf => render_pdf(data, proof_hash),
    }
}

fn status_label(status: ComplianceState) -> &'static str {
    match status {
        ComplianceState::Compliant => "compliant",
        ComplianceState::Under => "under",
        ComplianceState::Over => "over",
    }
}

/// CSV rendering: a preamble of `key,value` rows followed by the event table
fn render_csv(data: &ProofData, proof_hash: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("client,{}\n", csv_escape(&data.commitment.client_name)));
    out.push_str(&format!("commitment_id,{}\n", data.commitment.id));
    out.push_str(&format!("window_start,{}\n", data.window_start.to_rfc3339()));
    out.push_str(&format!("window_end,{}\n", data.window_end.to_rfc3339()));
    out.push_str(&format!("target_hours,{}\n", data.commitment.target_hours));
    out.push_str(&format!("actual_hours,{}\n", data.actual_hours));
    out.push_str(&format!("status,{}\n", status_label(data.status)));
    out.push_str(&format!("proof_hash,{proof_hash}\n"));
    out.push('\n');
    out.push_str("event_id,title,start,end,hours\n");
    for event in &data.events {
        out.push_str(&format!(
            "{},{},{},{},{}\n",
            event.event_id,
            csv_escape(&event.title),
            event.start.to_rfc3339(),
            event.end.to_rfc3339(),
            event.hours,
        ));
    }
    out
}

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Minimal single-page PDF rendering.
///
/// Emits a fixed five-object document (catalog, page tree, page, content
/// stream, Helvetica font) with a correct xref table. Output depends only
/// on the proof data and hash, never on render time.
fn render_pdf(data: &ProofData, proof_hash: &str) -> Vec<u8> {
    let mut lines = vec![
        "Commitment Proof".to_string(),
        String::new(),
        format!("Client: {}", data.commitment.client_name),
        format!("Commitment: {}", data.commitment.id),
        format!(
            "Window: {} - {}",
            data.window_start.format("%Y-%m-%d %H:%M UTC"),
            data.window_end.format("%Y-%m-%d %H:%M UTC"),
        ),
        format!("Target hours: {:.2}", data.commitment.target_hours),
        format!("Actual hours: {:.2}", data.actual_hours),
        format!("Status: {}", status_label(data.status)),
        String::new(),
        "Billable events:".to_string(),
    ];
    for event in &data.events {
        lines.push(format!(
            "  {}  {:.2}h  {}",
            event.start.format("%Y-%m-%d %H:%M"),
            event.hours,
            event.title,
        ));
    }
    lines.push(String::new());
    lines.push(format!("Proof hash (SHA-256): {proof_hash}"));

    let mut content = String::from("BT\n/F1 10 Tf\n12 TL\n50 770 Td\n");
    for line in &lines {
        content.push_str(&format!("({}) Tj\nT*\n", pdf_escape(line)));
    }
    content.push_str("ET\n");

    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
         /Resources << /Font << /F1 5 0 R >> >> /Contents 4 0 R >>"
            .to_string(),
        format!(
            "<< /Length {} >>\nstream\n{}endstream",
            content.len(),
            content
        ),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ];

    let mut out = String::from("%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.push_str(&format!("{} 0 obj\n{}\nendobj\n", i + 1, body));
    }

    let xref_offset = out.len();
    out.push_str(&format!("xref\n0 {}\n", objects.len() + 1));
    out.push_str("0000000000 65535 f \n");
    for offset in offsets {
        out.push_str(&format!("{offset:010} 00000 n \n"));
    }
    out.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref_offset
    ));

    out.into_bytes()
}

fn pdf_escape(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('(', "\\(")
        .replace(')', "\\)")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WindowType;
    use chrono::TimeZone;

    fn sample_proof() -> ProofData {
        let commitment = Commitment {
            id: CommitmentId(uuid::Uuid::from_u128(7)),
            client_id: "acme".to_string(),
            client_name: "Acme Corp".to_string(),
            target_hours: 20.0,
            window_type: WindowType::Weekly,
            rolling_window_weeks: 1,
            hard_minimum: false,
            proof_required: true,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        };
        let window = CommitmentWindow {
            start: Utc.with_ymd_and_hms(2026, 2, 27, 17, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 3, 6, 17, 0, 0).unwrap(),
        };
        let events = vec![
            ProofEvent {
                event_id: EventId(uuid::Uuid::from_u128(2)),
                title: "Acme workshop".to_string(),
                start: Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap(),
                end: Utc.with_ymd_and_hms(2026, 3, 3, 14, 0, 0).unwrap(),
                hours: 5.0,
            },
            ProofEvent {
                event_id: EventId(uuid::Uuid::from_u128(1)),
                title: "Acme review, quarterly".to_string(),
                start: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
                end: Utc.with_ymd_and_hms(2026, 3, 2, 22, 0, 0).unwrap(),
                hours: 13.0,
            },
        ];
        ProofData::new(commitment, window, 18.0, ComplianceState::Under, events)
    }

    #[test]
    fn test_events_sorted_by_start_then_id() {
        let proof = sample_proof();
        assert_eq!(proof.events[0].hours, 13.0);
        assert_eq!(proof.events[1].hours, 5.0);
    }

    #[test]
    fn test_proof_hash_deterministic() {
        let a = sample_proof();
        let b = sample_proof();
        assert_eq!(a.proof_hash().unwrap(), b.proof_hash().unwrap());

        let mut c = sample_proof();
        c.actual_hours = 19.0;
        assert_ne!(a.proof_hash().unwrap(), c.proof_hash().unwrap());
    }

    #[test]
    fn test_hash_matches_canonical_bytes() {
        let proof = sample_proof();
        let recomputed = sha256_hex(proof.canonical_json().unwrap().as_bytes());
        assert_eq!(proof.proof_hash().unwrap(), recomputed);
    }

    #[test]
    fn test_csv_embeds_hash_and_events() {
        let proof = sample_proof();
        let hash = proof.proof_hash().unwrap();
        let csv = String::from_utf8(render_proof(&proof, &hash, ProofFormat::Csv)).unwrap();

        assert!(csv.contains(&format!("proof_hash,{hash}")));
        assert!(csv.contains("status,under"));
        // Title with a comma is quoted
        assert!(csv.contains("\"Acme review, quarterly\""));
        assert_eq!(csv.lines().filter(|l| l.contains("Acme")).count(), 3);
    }

    #[test]
    fn test_pdf_structure_and_hash() {
        let proof = sample_proof();
        let hash = proof.proof_hash().unwrap();
        let pdf = render_proof(&proof, &hash, ProofFormat::Pdf);
        let text = String::from_utf8(pdf.clone()).unwrap();

        assert!(text.starts_with("%PDF-1.4"));
        assert!(text.ends_with("%%EOF\n"));
        assert!(text.contains(&hash));
        assert!(text.contains("/BaseFont /Helvetica"));

        // Identical input renders identical bytes
        assert_eq!(pdf, render_proof(&proof, &hash, ProofFormat::Pdf));
    }

    #[test]
    fn test_object_key_layout() {
        let user_id = UserId(uuid::Uuid::from_u128(9));
        let commitment_id = CommitmentId(uuid::Uuid::from_u128(7));
        let rendered_at = Utc.with_ymd_and_hms(2026, 3, 6, 17, 30, 5).unwrap();

        let key = proof_object_key(user_id, commitment_id, rendered_at, ProofFormat::Pdf);
        assert_eq!(
            key,
            format!("proofs/{user_id}/{commitment_id}/2026-03-06T17-30-05Z.pdf")
        );
    }

    #[test]
    fn test_key_ownership_validation() {
        let owner = UserId::new();
        let other = UserId::new();
        let key = format!("proofs/{owner}/abc/doc.pdf");

        assert!(validate_proof_key(owner, &key).is_ok());
        let err = validate_proof_key(other, &key).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));

        let traversal = format!("proofs/{owner}/../{other}/doc.pdf");
        assert!(validate_proof_key(owner, &traversal).is_err());
    }
}
