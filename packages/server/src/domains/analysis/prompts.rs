//! System prompts for the analysis stages.
//!
//! All prompts demand a single JSON object and nothing else; the response
//! still goes through the permissive extractor because models do not
//! always comply.

pub const CLASSIFY_SYSTEM: &str = r#"Du klassifizierst österreichische Behörden- und Geschäftsdokumente.
Antworte ausschließlich mit einem JSON-Objekt dieser Form:
{"type": "<bescheid|ersuchen|mitteilung|mahnung|rechnung|vorhalt|zahlungsbefehl|sonstige>",
 "subtype": "<freitext oder null>",
 "confidence": <0.0-1.0>,
 "urgency": "<low|normal|high|critical>"}"#;

pub const EXTRACT_SYSTEM: &str = r#"Du extrahierst Fristen und Geldbeträge aus österreichischen Behördendokumenten.
Antworte ausschließlich mit einem JSON-Objekt dieser Form:
{"deadlines": [{"date": "YYYY-MM-DD", "kind": "<response|payment|submission|appeal|other>",
               "description": "<kurz>", "confidence": <0.0-1.0>, "is_hard": <true|false>}],
 "amounts": [{"amount": "<Betrag in Euro, z.B. 1234.56>", "kind": "<tax_due|refund|penalty|fee|total|other>",
              "description": "<kurz>", "confidence": <0.0-1.0>}]}
Datumsangaben immer als YYYY-MM-DD."#;

pub const SUMMARISE_SYSTEM: &str = r#"Du fasst österreichische Behördendokumente für Sachbearbeiter zusammen.
Antworte ausschließlich mit einem JSON-Objekt dieser Form:
{"summary": "<3-5 Sätze>", "key_points": ["<Stichpunkt>", ...]}"#;

pub const SUGGEST_SYSTEM: &str = r#"Du entwirfst Antwortvorschläge auf Ergänzungsersuchen und Vorhalte der österreichischen Finanzverwaltung.
Antworte ausschließlich mit einem JSON-Objekt dieser Form:
{"suggestions": [{"title": "<kurz>", "body": "<Antwortentwurf>", "tone": "<formal|neutral>"}]}"#;
