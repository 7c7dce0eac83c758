use std::sync::LazyLock;

use regex::Regex;

use crate::domain::{Category, WorkMode};

const IT_KEYWORDS: [&str; 61] = [
    "it",
    "information technology",
    "software",
    "developer",
    "engineer",
    "backend",
    "frontend",
    "full stack",
    "fullstack",
    "devops",
    "cloud",
    "aws",
    "azure",
    "gcp",
    "kubernetes",
    "docker",
    "data engineer",
    "data scientist",
    "machine learning",
    "ml",
    "ai",
    "cyber security",
    "cybersecurity",
    "security engineer",
    "qa",
    "test engineer",
    "automation",
    "sdet",
    "network",
    "system admin",
    "sysadmin",
    "database",
    "dba",
    "python",
    "java",
    "javascript",
    "react",
    "node",
    "django",
    "flask",
    "php",
    "laravel",
    "dotnet",
    ".net",
    "c#",
    "c++",
    "golang",
    "go",
    "android",
    "ios",
    "mobile app",
    "app developer",
    "ui/ux",
    "ux",
    "ui designer",
    "product designer",
    "technical support",
    "helpdesk",
    "support engineer",
    "web designer",
    "web developer",
];

static IT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    let alternation = IT_KEYWORDS
        .iter()
        .map(|keyword| regex::escape(keyword))
        .collect::<Vec<_>>()
        .join("|");
    // Keywords such as "c#" end in a non-word character, so `\b` cannot be used.
    Regex::new(&format!("(?:^|[^a-z0-9])(?:{alternation})(?:$|[^a-z0-9#+])"))
        .expect("keyword pattern is valid")
});

static EXPERIENCE_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)\s*(?:-|to)\s*(\d+(?:\.\d+)?)\s*(?:\+\s*)?(?:year|yr)")
        .expect("valid regex")
});
static EXPERIENCE_PLUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*\+\s*(?:year|yr)").expect("valid regex"));
static EXPERIENCE_MORE_THAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:more than|minimum|min\.?|at least)\s*(\d+(?:\.\d+)?)\s*(?:year|yr)")
        .expect("valid regex")
});
static EXPERIENCE_SINGLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*(?:year|yr)").expect("valid regex"));

static SALARY_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d,]*").expect("valid regex"));
static NPR_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\bnpr\b|\brs\.?(?:\s|\d|$)|रु)").expect("valid regex"));
static USD_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\busd\b|\$)").expect("valid regex"));

/// Work mode from free text; `Unknown` when the text carries no signal.
pub fn infer_work_mode(text: &str) -> WorkMode {
    let lowered = text.to_lowercase();
    if ["remote", "work from home", "wfh"]
        .iter()
        .any(|keyword| lowered.contains(keyword))
    {
        WorkMode::Remote
    } else if lowered.contains("hybrid") {
        WorkMode::Hybrid
    } else if lowered.contains("on-site") || lowered.contains("onsite") {
        WorkMode::Onsite
    } else {
        WorkMode::Unknown
    }
}

/// IT vs Non-IT by keyword. Returns `Unknown` only when there is no text at all.
pub fn classify_category(parts: &[&str]) -> Category {
    let text = parts
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if text.is_empty() {
        return Category::Unknown;
    }
    if IT_PATTERN.is_match(&text) {
        Category::It
    } else {
        Category::NonIt
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExperienceYears {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// "1-3 years" → 1..3, "2+ years" → 2.., "Not required" → 0..0.
pub fn parse_experience(raw: &str) -> ExperienceYears {
    let text = raw.trim().to_lowercase();
    let none = ExperienceYears {
        min: None,
        max: None,
    };
    if text.is_empty() {
        return none;
    }
    if text.contains("not required") || text.contains("no experience") || text.contains("fresher")
    {
        return ExperienceYears {
            min: Some(0.0),
            max: Some(0.0),
        };
    }
    if let Some(caps) = EXPERIENCE_RANGE.captures(&text) {
        return ExperienceYears {
            min: caps[1].parse().ok(),
            max: caps[2].parse().ok(),
        };
    }
    if let Some(caps) = EXPERIENCE_PLUS.captures(&text) {
        return ExperienceYears {
            min: caps[1].parse().ok(),
            max: None,
        };
    }
    if let Some(caps) = EXPERIENCE_MORE_THAN.captures(&text) {
        return ExperienceYears {
            min: caps[1].parse().ok(),
            max: None,
        };
    }
    if let Some(caps) = EXPERIENCE_SINGLE.captures(&text) {
        let value = caps[1].parse().ok();
        return ExperienceYears {
            min: value,
            max: value,
        };
    }
    none
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Salary {
    pub min: Option<u64>,
    pub max: Option<u64>,
    pub currency: Option<String>,
    pub period: Option<String>,
}

/// Parses "NPR 40,000 - 60,000 / Month" style compensation text.
pub fn parse_salary(raw: &str) -> Salary {
    let text = raw.trim().to_lowercase();
    if text.is_empty()
        || ["not disclosed", "based on experience", "negotiable"]
            .iter()
            .any(|marker| text.contains(marker))
    {
        return Salary::default();
    }

    let currency = if NPR_MARKER.is_match(&text) {
        Some("NPR".to_string())
    } else if USD_MARKER.is_match(&text) {
        Some("USD".to_string())
    } else {
        None
    };

    let period = if text.contains("month") {
        Some("month")
    } else if text.contains("year") || text.contains("annum") {
        Some("year")
    } else if text.contains("day") {
        Some("day")
    } else if text.contains("hour") {
        Some("hour")
    } else {
        None
    }
    .map(str::to_string);

    let numbers = SALARY_NUMBER
        .find_iter(&text)
        .filter_map(|m| m.as_str().replace(',', "").parse::<u64>().ok())
        .collect::<Vec<_>>();

    Salary {
        min: numbers.iter().min().copied(),
        max: numbers.iter().max().copied(),
        currency,
        period,
    }
}
