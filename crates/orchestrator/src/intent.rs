use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};

use citabot_core::domain::conversation::CollectedData;

/// Deterministic interpretation of one inbound message. The analyzer is
/// strictly a translator: it extracts signals, it never decides transitions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedIntent {
    pub wants_human: bool,
    pub wants_restart: bool,
    /// `Some(true)` for a clear yes, `Some(false)` for a clear no, `None`
    /// when the message is not a confirmation answer.
    pub confirmation: Option<bool>,
    pub service_mention: Option<String>,
    pub time_mention: Option<DateTime<Utc>>,
    pub language_hint: Option<String>,
    pub confidence_score: u8,
}

impl ExtractedIntent {
    /// Captured fields as a mergeable data fragment.
    pub fn as_collected_data(&self) -> CollectedData {
        CollectedData {
            selected_service: self.service_mention.clone(),
            preferred_time: self.time_mention,
            extras: Default::default(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct IntentAnalyzer;

impl IntentAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, text: &str) -> ExtractedIntent {
        self.analyze_at(text, Utc::now())
    }

    /// Analysis with an injected clock, so relative dates are testable.
    pub fn analyze_at(&self, text: &str, now: DateTime<Utc>) -> ExtractedIntent {
        let normalized_text = normalize_text(text);
        let tokens = tokenize(&normalized_text);

        let wants_human = contains_any(&normalized_text, ESCALATION_PHRASES);
        let wants_restart = contains_any(&normalized_text, RESTART_PHRASES);
        let confirmation = extract_confirmation(&tokens);
        let service_mention = extract_service(&normalized_text);
        let time_mention = extract_time(&normalized_text, &tokens, now);
        let language_hint = extract_language_hint(&tokens);

        let confidence_score = confidence_score(
            service_mention.is_some(),
            time_mention.is_some(),
            confirmation.is_some(),
            wants_human || wants_restart,
            language_hint.is_some(),
        );

        ExtractedIntent {
            wants_human,
            wants_restart,
            confirmation,
            service_mention,
            time_mention,
            language_hint,
            confidence_score,
        }
    }
}

const ESCALATION_PHRASES: &[&str] = &[
    "hablar con alguien",
    "hablar con una persona",
    "con un humano",
    "un agente",
    "un operador",
    "atencion al cliente",
    "atención al cliente",
    "reclamacion",
    "reclamación",
    "talk to a human",
    "talk to someone",
    "real person",
    "human agent",
    "speak to an agent",
    "complaint",
];

const RESTART_PHRASES: &[&str] = &[
    "empezar de nuevo",
    "desde el principio",
    "reiniciar",
    "otra cita",
    "cambiar la cita",
    "start over",
    "start again",
    "restart",
    "from scratch",
];

const SERVICES: &[(&str, &str)] = &[
    ("corte", "corte"),
    ("haircut", "corte"),
    ("tinte", "tinte"),
    ("color", "tinte"),
    ("peinado", "peinado"),
    ("manicura", "manicura"),
    ("manicure", "manicura"),
    ("masaje", "masaje"),
    ("massage", "masaje"),
    ("depilacion", "depilacion"),
    ("depilación", "depilacion"),
    ("consulta", "consulta"),
];

const YES_TOKENS: &[&str] =
    &["si", "sí", "yes", "vale", "ok", "okay", "confirmo", "perfecto", "correcto", "claro"];
const NO_TOKENS: &[&str] = &["no", "nope", "cancelar", "cancel"];

const SPANISH_MARKERS: &[&str] =
    &["hola", "gracias", "quiero", "necesito", "por", "favor", "buenas", "buenos", "cita"];
const ENGLISH_MARKERS: &[&str] =
    &["hello", "hi", "thanks", "please", "want", "need", "appointment", "book"];

fn normalize_text(text: &str) -> String {
    text.to_lowercase()
}

fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_alphanumeric() || character == ':' {
            sanitized.push(character);
        } else {
            sanitized.push(' ');
        }
    }
    sanitized.split_whitespace().map(|token| token.to_string()).collect()
}

fn contains_any(text: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| text.contains(phrase))
}

fn extract_confirmation(tokens: &[String]) -> Option<bool> {
    // Only short answers count; "no quiero el tinte" is detail, not a veto.
    if tokens.len() > 4 {
        return None;
    }
    if tokens.iter().any(|token| YES_TOKENS.contains(&token.as_str())) {
        return Some(true);
    }
    if tokens.iter().any(|token| NO_TOKENS.contains(&token.as_str())) {
        return Some(false);
    }
    None
}

fn extract_service(text: &str) -> Option<String> {
    SERVICES
        .iter()
        .find(|(mention, _)| text.contains(mention))
        .map(|(_, canonical)| (*canonical).to_string())
}

fn weekday_from_mention(token: &str) -> Option<Weekday> {
    match token {
        "lunes" | "monday" => Some(Weekday::Mon),
        "martes" | "tuesday" => Some(Weekday::Tue),
        "miercoles" | "miércoles" | "wednesday" => Some(Weekday::Wed),
        "jueves" | "thursday" => Some(Weekday::Thu),
        "viernes" | "friday" => Some(Weekday::Fri),
        "sabado" | "sábado" | "saturday" => Some(Weekday::Sat),
        "domingo" | "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

fn extract_clock(tokens: &[String]) -> Option<NaiveTime> {
    for token in tokens {
        if let Some((hours, minutes)) = token.split_once(':') {
            if let (Ok(hour), Ok(minute)) = (hours.parse::<u32>(), minutes.parse::<u32>()) {
                if let Some(time) = NaiveTime::from_hms_opt(hour, minute, 0) {
                    return Some(time);
                }
            }
        }
    }
    None
}

/// Resolve a day + optional clock mention into a concrete UTC time. Defaults
/// to 10:00 when the client named only a day.
fn extract_time(text: &str, tokens: &[String], now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let clock = extract_clock(tokens).unwrap_or_else(|| {
        NaiveTime::from_hms_opt(10, 0, 0).unwrap_or_default()
    });

    let day = if text.contains("hoy") || text.contains("today") {
        Some(now.date_naive())
    } else if text.contains("mañana") || text.contains("manana") || text.contains("tomorrow") {
        Some(now.date_naive() + Duration::days(1))
    } else if let Some(weekday) = tokens.iter().find_map(|token| weekday_from_mention(token)) {
        let today = now.date_naive();
        let mut offset = (weekday.num_days_from_monday() as i64
            - today.weekday().num_days_from_monday() as i64)
            .rem_euclid(7);
        if offset == 0 {
            offset = 7;
        }
        Some(today + Duration::days(offset))
    } else {
        None
    };

    match (day, extract_clock(tokens)) {
        (Some(day), _) => Some(day.and_time(clock).and_utc()),
        // A bare clock time means "today at that time".
        (None, Some(clock_only)) => Some(now.date_naive().and_time(clock_only).and_utc()),
        (None, None) => None,
    }
}

fn extract_language_hint(tokens: &[String]) -> Option<String> {
    let spanish = tokens.iter().filter(|t| SPANISH_MARKERS.contains(&t.as_str())).count();
    let english = tokens.iter().filter(|t| ENGLISH_MARKERS.contains(&t.as_str())).count();
    if spanish > english && spanish > 0 {
        Some("es".to_string())
    } else if english > spanish {
        Some("en".to_string())
    } else {
        None
    }
}

fn confidence_score(
    has_service: bool,
    has_time: bool,
    has_confirmation: bool,
    has_control_signal: bool,
    has_language: bool,
) -> u8 {
    let mut score = 10u8;
    if has_service {
        score += 30;
    }
    if has_time {
        score += 25;
    }
    if has_confirmation {
        score += 20;
    }
    if has_control_signal {
        score += 20;
    }
    if has_language {
        score += 10;
    }
    score.min(100)
}
