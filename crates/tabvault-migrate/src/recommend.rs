//! Sensitivity scoring by key name.
//!
//! Pure and total: only key names are inspected (never values), and every
//! key gets exactly one priority, `Low` when nothing matches.
//!
//! A name is split into lowercase words at separators and camelCase humps
//! (`refreshToken`, `api-key`, `XMLHttpToken`). Keywords match whole words,
//! with an optional trailing `s`; a keyword containing a space matches that
//! run of words.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Important,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub key: String,
    pub priority: Priority,
    pub reason: String,
}

const CRITICAL: &[&str] = &[
    "token",
    "secret",
    "password",
    "passwd",
    "passphrase",
    "credential",
    "auth",
    "oauth",
    "authorization",
    "authentication",
    "session",
    "apikey",
    "api key",
    "privatekey",
    "private key",
    "jwt",
    "bearer",
    "cookie",
    "otp",
];

const IMPORTANT: &[&str] = &[
    "user",
    "username",
    "profile",
    "account",
    "email",
    "phone",
    "address",
    "customer",
    "patient",
    "contact",
    "payment",
    "billing",
    "invoice",
    "card",
    "bank",
    "finance",
    "transaction",
    "order",
    "ledger",
    "entity",
    "record",
    "document",
    "draft",
];

const LOW: &[&str] = &[
    "theme", "ui", "pref", "preference", "setting", "layout", "locale", "language", "sidebar",
    "view", "sort", "filter",
];

/// Score every key and sort by descending priority. Ties keep input order.
pub fn get_migration_recommendations<S: AsRef<str>>(keys: &[S]) -> Vec<Recommendation> {
    let mut recs: Vec<Recommendation> = keys.iter().map(|k| classify(k.as_ref())).collect();
    recs.sort_by(|a, b| b.priority.cmp(&a.priority));
    recs
}

/// Classify one key name.
pub fn classify(key: &str) -> Recommendation {
    let words = split_words(key);

    let (priority, reason) = if let Some(kw) = first_match(&words, CRITICAL) {
        (
            Priority::Critical,
            format!("credential-like name (matches '{kw}'): encrypt immediately"),
        )
    } else if let Some(kw) = first_match(&words, IMPORTANT) {
        (
            Priority::Important,
            format!("personal or business data (matches '{kw}'): encrypt soon"),
        )
    } else if let Some(kw) = first_match(&words, LOW) {
        (
            Priority::Low,
            format!("interface preference (matches '{kw}'): encryption optional"),
        )
    } else {
        (
            Priority::Low,
            "no sensitive pattern matched: encryption optional".to_string(),
        )
    };

    Recommendation {
        key: key.to_string(),
        priority,
        reason,
    }
}

fn first_match(words: &[String], keywords: &[&'static str]) -> Option<&'static str> {
    keywords.iter().copied().find(|kw| {
        let parts: Vec<&str> = kw.split(' ').collect();
        let last = parts.len() - 1;
        words.windows(parts.len()).any(|run| {
            run.iter().zip(&parts).enumerate().all(|(i, (word, part))| {
                word == part || (i == last && word.strip_suffix('s') == Some(*part))
            })
        })
    })
}

fn split_words(key: &str) -> Vec<String> {
    let chars: Vec<char> = key.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }

        if let Some(&prev) = i.checked_sub(1).and_then(|j| chars.get(j)) {
            let next = chars.get(i + 1).copied();
            let hump = prev.is_lowercase() && c.is_uppercase();
            let acronym_end = prev.is_uppercase()
                && c.is_uppercase()
                && next.is_some_and(char::is_lowercase);
            let digits = prev.is_alphanumeric() && prev.is_ascii_digit() != c.is_ascii_digit();
            if (hump || acronym_end || digits) && !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        }
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}
