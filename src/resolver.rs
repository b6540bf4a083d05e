//! Display text and action routing per notification type.

use crate::types::{NotificationKind, NotificationRecord};
use serde::Serialize;

/// Route for anything that cannot be resolved more precisely.
pub const FALLBACK_URL: &str = "/notifications";

const FALLBACK_TITLE: &str = "New notification";
const FALLBACK_MESSAGE: &str = "You have a new notification.";
const FALLBACK_LABEL: &str = "View";

/// Everything a renderer needs for one notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedAction {
    pub title: String,
    pub message: String,
    pub action_label: String,
    pub action_url: String,
}

/// Navigation layer invoked when a notification is opened.
pub trait Navigator: Send + Sync {
    fn navigate(&self, url: &str);
}

impl<F> Navigator for F
where
    F: Fn(&str) + Send + Sync,
{
    fn navigate(&self, url: &str) {
        self(url)
    }
}

/// Maps `(type, data)` to display text and a route. Never fails.
#[derive(Clone, Debug, Default)]
pub struct ActionResolver;

impl ActionResolver {
    pub fn new() -> Self {
        ActionResolver
    }

    pub fn resolve(&self, record: &NotificationRecord) -> ResolvedAction {
        let template = template_for(record);

        // Raw server fields win over templates; templates win over the generic text.
        let (title, message, label, url) = match template {
            Some(t) => (t.title, t.message, t.label, t.url),
            None => (None, None, None, None),
        };

        ResolvedAction {
            title: record
                .title
                .clone()
                .or(title)
                .unwrap_or_else(|| FALLBACK_TITLE.to_string()),
            message: record
                .message
                .clone()
                .or(message)
                .unwrap_or_else(|| FALLBACK_MESSAGE.to_string()),
            action_label: label.unwrap_or_else(|| FALLBACK_LABEL.to_string()),
            action_url: record
                .action_url
                .clone()
                .or(url)
                .unwrap_or_else(|| FALLBACK_URL.to_string()),
        }
    }
}

struct Template {
    title: Option<String>,
    message: Option<String>,
    label: Option<String>,
    /// None when the record lacks the id the route needs.
    url: Option<String>,
}

impl Template {
    fn new(title: &str, message: String, label: &str, url: Option<String>) -> Self {
        Self {
            title: Some(title.to_string()),
            message: Some(message),
            label: Some(label.to_string()),
            url,
        }
    }
}

fn template_for(record: &NotificationRecord) -> Option<Template> {
    let company = record
        .data_str("companyName")
        .or_else(|| record.data_str("partnerName"));
    let contract_url = record
        .data_str("contractId")
        .map(|id| format!("/contracts/{id}"));
    let partner_url = record
        .data_str("partnerId")
        .map(|id| format!("/partners/{id}"));
    let lead_url = record.data_str("leadId").map(|id| format!("/sales/leads/{id}"));

    let template = match &record.kind {
        NotificationKind::ContractSigned => Template::new(
            "Contract signed",
            about(company, "A contract was signed and is ready for review.", |c| {
                format!("The contract for {c} was signed and is ready for review.")
            }),
            "Review contract",
            contract_url,
        ),
        NotificationKind::ContractApproved => Template::new(
            "Contract approved",
            about(company, "A contract was approved.", |c| {
                format!("The contract for {c} was approved.")
            }),
            "View partner",
            partner_url.or(contract_url),
        ),
        NotificationKind::ContractDeclined => Template::new(
            "Contract declined",
            about(company, "A contract was declined.", |c| {
                format!("The contract for {c} was declined.")
            }),
            "View contract",
            contract_url,
        ),
        NotificationKind::ContractGenerated => Template::new(
            "Contract ready",
            about(company, "A contract was generated.", |c| {
                format!("A contract was generated for {c}.")
            }),
            "Open contract",
            contract_url,
        ),
        NotificationKind::PartnerCreated => Template::new(
            "New partner onboarded",
            about(company, "A new partner was created.", |c| {
                format!("{c} is now a partner.")
            }),
            "View partner",
            partner_url,
        ),
        NotificationKind::LeadStatusChange => {
            let status = record.data_str("status").map(|s| s.replace('_', " "));
            let message = match (company, status) {
                (Some(c), Some(s)) => format!("{c} moved to {s}."),
                (None, Some(s)) => format!("A lead moved to {s}."),
                (Some(c), None) => format!("{c} changed status."),
                (None, None) => "A lead changed status.".to_string(),
            };
            Template::new("Lead status updated", message, "View lead", lead_url)
        }
        NotificationKind::LeadAssigned => Template::new(
            "New lead assigned",
            about(company, "A lead was assigned to you.", |c| {
                format!("{c} was assigned to you.")
            }),
            "View lead",
            lead_url,
        ),
        NotificationKind::Other(_) => return None,
    };

    Some(template)
}

fn about(company: Option<String>, generic: &str, named: impl FnOnce(&str) -> String) -> String {
    match company {
        Some(c) => named(&c),
        None => generic.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(kind: &str) -> NotificationRecord {
        NotificationRecord::new("n1", kind, Utc::now())
    }

    #[test]
    fn test_contract_signed() {
        let action = ActionResolver::new().resolve(
            &record("contract_signed")
                .with_data("contractId", "C1")
                .with_data("companyName", "Cairo Auto Parts"),
        );

        assert_eq!(action.title, "Contract signed");
        assert_eq!(
            action.message,
            "The contract for Cairo Auto Parts was signed and is ready for review."
        );
        assert_eq!(action.action_label, "Review contract");
        assert_eq!(action.action_url, "/contracts/C1");
    }

    #[test]
    fn test_contract_approved_prefers_partner() {
        let resolver = ActionResolver::new();
        let with_partner = record("contract_approved")
            .with_data("contractId", "C1")
            .with_data("partnerId", "P9");
        assert_eq!(resolver.resolve(&with_partner).action_url, "/partners/P9");

        let contract_only = record("contract_approved").with_data("contractId", "C1");
        assert_eq!(resolver.resolve(&contract_only).action_url, "/contracts/C1");
    }

    #[test]
    fn test_lead_status_change_message() {
        let action = ActionResolver::new().resolve(
            &record("lead_status_change")
                .with_data("leadId", 17)
                .with_data("status", "proposal_sent"),
        );
        assert_eq!(action.message, "A lead moved to proposal sent.");
        assert_eq!(action.action_url, "/sales/leads/17");
    }

    #[test]
    fn test_known_type_missing_id_degrades() {
        let action = ActionResolver::new().resolve(&record("partner_created"));
        assert_eq!(action.title, "New partner onboarded");
        assert_eq!(action.action_url, FALLBACK_URL);
    }

    #[test]
    fn test_unknown_type_uses_raw_fields() {
        let action = ActionResolver::new().resolve(
            &record("fleet_alert")
                .with_title("Vehicle overdue")
                .with_message("Truck 12 missed its service window")
                .with_action_url("/fleet/12"),
        );
        assert_eq!(action.title, "Vehicle overdue");
        assert_eq!(action.message, "Truck 12 missed its service window");
        assert_eq!(action.action_url, "/fleet/12");
    }

    #[test]
    fn test_unknown_type_without_fields() {
        let action = ActionResolver::new().resolve(&record(""));
        assert_eq!(action.title, FALLBACK_TITLE);
        assert_eq!(action.message, FALLBACK_MESSAGE);
        assert_eq!(action.action_label, FALLBACK_LABEL);
        assert_eq!(action.action_url, FALLBACK_URL);
    }
}
