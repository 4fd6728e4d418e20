//! Decides which stock items deserve a notification, and words it

use std::collections::HashMap;

use bitflags::bitflags;
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use serde_json::Value;

use crate::inventory::{StockEntry, VolatileStock};
use crate::settings::{Language, Settings};
use crate::store::ProductOverride;

bitflags! {
    /// The kinds of alerts that are enabled
    pub struct AlertKinds: u8 {
        const EXPIRING = 1;
        const EXPIRED = 2;
        const MISSING = 4;
    }
}

impl AlertKinds {
    pub fn from_settings(settings: &Settings) -> Self {
        let mut kinds = AlertKinds::empty();
        kinds.set(AlertKinds::EXPIRING, settings.notify_expiring);
        kinds.set(AlertKinds::EXPIRED, settings.notify_expired);
        kinds.set(AlertKinds::MISSING, settings.notify_missing);
        kinds
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Expiring,
    Expired,
    Missing,
}

impl AlertKind {
    /// The name used in the notification log
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Expiring => "expiring",
            AlertKind::Expired => "expired",
            AlertKind::Missing => "missing",
        }
    }

    fn label(&self, texts: &Texts) -> &'static str {
        match self {
            AlertKind::Expiring => texts.type_expiring,
            AlertKind::Expired => texts.type_expired,
            AlertKind::Missing => texts.type_missing,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub product_id: Option<i64>,
    pub product_name: String,
    /// e.g. `Expiry date: 2024-05-03`, in the configured language
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AlertOptions {
    pub default_days: u32,
    pub kinds: AlertKinds,
    pub language: Language,
}

impl AlertOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            default_days: settings.default_days_before_expiry,
            kinds: AlertKinds::from_settings(settings),
            language: settings.language,
        }
    }
}


struct Texts {
    expiry_date: &'static str,
    expired_since: &'static str,
    missing_amount: &'static str,
    unknown: &'static str,
    product_nr: &'static str,
    type_expiring: &'static str,
    type_expired: &'static str,
    type_missing: &'static str,
    /// `{count}` is replaced with the number of alerts
    title: &'static str,
}

static TEXTS_DE: Texts = Texts {
    expiry_date: "Ablaufdatum",
    expired_since: "Abgelaufen seit",
    missing_amount: "Fehlmenge",
    unknown: "Unbekannt",
    product_nr: "Produkt",
    type_expiring: "Bald ablaufend",
    type_expired: "Abgelaufen",
    type_missing: "Mindestbestand unterschritten",
    title: "Grocy Warnung: {count} Produkt(e) erfordern Aufmerksamkeit",
};

static TEXTS_EN: Texts = Texts {
    expiry_date: "Expiry date",
    expired_since: "Expired since",
    missing_amount: "Missing amount",
    unknown: "Unknown",
    product_nr: "Product",
    type_expiring: "Expiring soon",
    type_expired: "Expired",
    type_missing: "Below minimum stock",
    title: "Grocy Warning: {count} product(s) require attention",
};

fn texts(language: Language) -> &'static Texts {
    match language {
        Language::De => &TEXTS_DE,
        Language::En => &TEXTS_EN,
    }
}


/// How many days ahead the volatile stock must be queried, so that every override can be honoured
pub fn query_window(default_days: u32, overrides: &[ProductOverride]) -> u32 {
    overrides.iter()
        .map(|o| o.custom_days_before_expiry)
        .fold(default_days, std::cmp::max)
}

/// Computes the alerts of the day.
///
/// `volatile` must have been queried with (at least) [`query_window`] days.
/// A product that has an override is only reported as expiring within its own number of days, other products within the default number of days.
pub fn evaluate(volatile: &VolatileStock, overrides: &[ProductOverride], options: &AlertOptions, today: NaiveDate) -> Vec<Alert> {
    let texts = texts(options.language);
    let overrides: HashMap<i64, u32> = overrides.iter()
        .map(|o| (o.product_id, o.custom_days_before_expiry))
        .collect();
    let mut alerts = Vec::new();

    if options.kinds.contains(AlertKinds::EXPIRING) {
        for item in &volatile.due_products {
            let product_id = item.resolved_product_id();
            let days = product_id
                .and_then(|id| overrides.get(&id).copied())
                .unwrap_or(options.default_days);
            let best_before = item.best_before_date.as_deref().unwrap_or("");

            // A window that ends beyond the last representable date has no end
            let window_end = today.checked_add_signed(Duration::days(i64::from(days)));
            if let (Ok(date), Some(end)) = (NaiveDate::parse_from_str(best_before, "%Y-%m-%d"), window_end) {
                if date > end {
                    continue;
                }
            }

            let name = match item.product_name() {
                Some(name) => name.to_string(),
                None => format!("{} #{}", texts.product_nr, product_id.map(|id| id.to_string()).unwrap_or_default()),
            };
            alerts.push(Alert {
                kind: AlertKind::Expiring,
                product_id,
                product_name: name,
                detail: format!("{}: {}", texts.expiry_date, best_before),
            });
        }
    }

    if options.kinds.contains(AlertKinds::EXPIRED) {
        for item in volatile.overdue_products.iter().chain(volatile.expired_products.iter()) {
            alerts.push(Alert {
                kind: AlertKind::Expired,
                product_id: item.resolved_product_id(),
                product_name: name_or_unknown(item, texts),
                detail: format!("{}: {}", texts.expired_since, item.best_before_date.as_deref().unwrap_or("")),
            });
        }
    }

    if options.kinds.contains(AlertKinds::MISSING) {
        for item in &volatile.missing_products {
            alerts.push(Alert {
                kind: AlertKind::Missing,
                product_id: item.resolved_product_id(),
                product_name: name_or_unknown(item, texts),
                detail: format!("{}: {}", texts.missing_amount, display_amount(item.amount_missing.as_ref())),
            });
        }
    }

    alerts
}

fn name_or_unknown(item: &StockEntry, texts: &Texts) -> String {
    item.product_name().unwrap_or(texts.unknown).to_string()
}

fn display_amount(amount: Option<&Value>) -> String {
    match amount {
        None | Some(Value::Null) => "?".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Builds the title and the body of the notification for these alerts
pub fn format_alerts(alerts: &[Alert], language: Language) -> (String, String) {
    let texts = texts(language);
    let title = texts.title.replace("{count}", &alerts.len().to_string());
    let message = alerts.iter()
        .map(|alert| format!("[{}] {} - {}", alert.kind.label(texts), alert.product_name, alert.detail))
        .collect::<Vec<_>>()
        .join("\n");
    (title, message)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Product;

    fn entry(id: i64, name: &str, best_before: &str) -> StockEntry {
        StockEntry {
            product_id: Some(id),
            product: Some(Product { id: Some(id), name: Some(name.to_string()) }),
            best_before_date: Some(best_before.to_string()),
            ..StockEntry::default()
        }
    }

    fn options(language: Language) -> AlertOptions {
        AlertOptions { default_days: 5, kinds: AlertKinds::all(), language }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[test]
    fn overrides_change_the_expiry_window() {
        let volatile = VolatileStock {
            due_products: vec![
                entry(1, "Milk", "2024-05-03"),
                entry(2, "Cheese", "2024-05-05"),
                entry(3, "Flour", "2024-05-09"),
            ],
            ..VolatileStock::default()
        };
        let overrides = vec![
            ProductOverride { product_id: 2, product_name: "Cheese".to_string(), custom_days_before_expiry: 2 },
            ProductOverride { product_id: 3, product_name: "Flour".to_string(), custom_days_before_expiry: 10 },
        ];
        assert_eq!(query_window(5, &overrides), 10);

        let alerts = evaluate(&volatile, &overrides, &options(Language::En), today());
        let names: Vec<&str> = alerts.iter().map(|a| a.product_name.as_str()).collect();
        assert_eq!(names, vec!["Milk", "Flour"]);
        assert_eq!(alerts[0].detail, "Expiry date: 2024-05-03");
    }

    #[test]
    fn huge_overrides_cover_everything() {
        let volatile = VolatileStock {
            due_products: vec![entry(1, "Honey", "2099-01-01")],
            ..VolatileStock::default()
        };
        let overrides = vec![
            ProductOverride { product_id: 1, product_name: "Honey".to_string(), custom_days_before_expiry: u32::MAX },
        ];
        assert_eq!(query_window(5, &overrides), u32::MAX);

        let alerts = evaluate(&volatile, &overrides, &options(Language::En), today());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].product_name, "Honey");
    }

    #[test]
    fn disabled_kinds_are_not_reported() {
        let volatile = VolatileStock {
            expired_products: vec![entry(1, "Milk", "2024-04-28")],
            missing_products: vec![StockEntry {
                name: Some("Flour".to_string()),
                amount_missing: Some(serde_json::json!(2)),
                ..StockEntry::default()
            }],
            ..VolatileStock::default()
        };
        let mut opts = options(Language::De);
        let alerts = evaluate(&volatile, &[], &opts, today());
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[1].detail, "Fehlmenge: 2");

        opts.kinds.remove(AlertKinds::EXPIRED);
        let alerts = evaluate(&volatile, &[], &opts, today());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::Missing);
    }

    #[test]
    fn alerts_are_formatted() {
        let alerts = vec![
            Alert { kind: AlertKind::Expired, product_id: Some(1), product_name: "Milk".to_string(), detail: "Expired since: 2024-04-28".to_string() },
            Alert { kind: AlertKind::Missing, product_id: None, product_name: "Unknown".to_string(), detail: "Missing amount: ?".to_string() },
        ];
        let (title, message) = format_alerts(&alerts, Language::En);
        assert_eq!(title, "Grocy Warning: 2 product(s) require attention");
        assert_eq!(message, "[Expired] Milk - Expired since: 2024-04-28\n[Below minimum stock] Unknown - Missing amount: ?");

        let (title, _) = format_alerts(&alerts, Language::De);
        assert_eq!(title, "Grocy Warnung: 2 Produkt(e) erfordern Aufmerksamkeit");
    }
}
