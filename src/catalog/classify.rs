//! Title heuristics for tyre attributes. These are best-effort guesses; a
//! wrong season on an oddly named product is tolerated noise.

use crate::catalog::models::{Season, VehicleType};
use once_cell::sync::Lazy;
use regex::Regex;

static RADIUS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\d{3}\s*[/\\\-\s]\s*\d{2}\s*[A-Za-z]*?\s*(R\s?\d{2}C?)")
        .expect("radius pattern compiles")
});

const WINTER_CUES: &[&str] = &[
    "winter",
    "зим",
    "snow",
    "nordic",
    "studded",
    "шип",
    "alpin",
    "blizzak",
    "x-ice",
    "ice zero",
    "icecontact",
    "ultragrip",
    "hakkapeliitta",
    "wintercontact",
    "w442",
    "ws90",
    "kw31",
    "i*cept",
];

const SUMMER_CUES: &[&str] = &[
    "summer",
    "літн",
    "летн",
    "лето",
    "ecocontact",
    "premiumcontact",
    "primacy",
    "turanza",
    "k125",
    "k435",
    "ventus prime",
];

const ALL_SEASON_CUES: &[&str] = &[
    "all season",
    "all-season",
    "allseason",
    "all weather",
    "всесезон",
    "4season",
    "4 season",
    "crossclimate",
    "quatrac",
    "vector 4",
];

#[derive(Debug, Clone, Copy)]
enum Cue {
    /// Token must equal the cue.
    Word(&'static str),
    /// Token must start with the cue.
    Stem(&'static str),
}

const CARGO_CUES: &[Cue] = &[
    Cue::Stem("cargo"),
    Cue::Word("van"),
    Cue::Word("bus"),
    Cue::Word("lt"),
    Cue::Stem("transpro"),
    Cue::Stem("вантаж"),
    Cue::Stem("груз"),
    Cue::Word("бус"),
];

const SUV_CUES: &[Cue] = &[
    Cue::Word("suv"),
    Cue::Word("4x4"),
    Cue::Word("4wd"),
    Cue::Stem("off-road"),
    Cue::Stem("offroad"),
    Cue::Stem("crossover"),
    Cue::Stem("позашлях"),
    Cue::Stem("внедорож"),
];

pub fn detect_season(text: &str) -> Season {
    let lowered = text.to_lowercase();
    let hit = |cues: &[&str]| cues.iter().any(|cue| lowered.contains(cue));
    if hit(WINTER_CUES) {
        Season::Winter
    } else if hit(SUMMER_CUES) {
        Season::Summer
    } else if hit(ALL_SEASON_CUES) {
        Season::AllSeason
    } else {
        Season::Summer
    }
}

/// Radius token from a tyre size such as `205/55 R16` or `215/65R16C`,
/// uppercased; empty when the title carries no size.
pub fn extract_radius(title: &str) -> String {
    RADIUS_PATTERN
        .captures(title)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().replace(' ', "").to_uppercase())
        .unwrap_or_default()
}

/// Normalizes a radius coming from a dedicated supplier field (`16`, `r16c`,
/// `R 16`). Falls back to the title when the field has no usable digits.
pub fn normalize_radius(raw: &str, title: &str) -> String {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();
    let digits: String = compact
        .trim_start_matches('R')
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.len() != 2 {
        return extract_radius(title);
    }
    let suffix = if compact.ends_with('C') { "C" } else { "" };
    format!("R{digits}{suffix}")
}

/// Truck and agro sizes are assigned from radius tables outside this
/// module; text only separates cargo, SUV and passenger cars.
pub fn classify_vehicle_type(title: &str, radius: &str) -> VehicleType {
    let tokens = tokenize(title);
    if radius.to_uppercase().contains('C') || matches_any(&tokens, CARGO_CUES) {
        VehicleType::Cargo
    } else if matches_any(&tokens, SUV_CUES) {
        VehicleType::Suv
    } else {
        VehicleType::Car
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn matches_any(tokens: &[String], cues: &[Cue]) -> bool {
    cues.iter().any(|cue| {
        tokens.iter().any(|token| match cue {
            Cue::Word(word) => token == word,
            Cue::Stem(stem) => token.starts_with(stem),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn season_cues() {
        assert_eq!(detect_season("Nokian Hakkapeliitta R5 205/55 R16"), Season::Winter);
        assert_eq!(detect_season("Шина зимова Premiorri"), Season::Winter);
        assert_eq!(detect_season("Michelin Primacy 4 205/55 R16"), Season::Summer);
        assert_eq!(detect_season("Michelin CrossClimate 2"), Season::AllSeason);
        assert_eq!(detect_season("Unknown Brand 185/65 R15"), Season::Summer);
    }

    #[test]
    fn radius_from_title() {
        assert_eq!(extract_radius("Michelin Primacy 4 205/55 R16 91V"), "R16");
        assert_eq!(extract_radius("Continental 215/65R16C 109/107R"), "R16C");
        assert_eq!(extract_radius("Pirelli 225/45 ZR17 94Y"), "R17");
        assert_eq!(extract_radius("Wiper blade 600mm"), "");
    }

    #[test]
    fn radius_from_field() {
        assert_eq!(normalize_radius("16", ""), "R16");
        assert_eq!(normalize_radius("r 15c", ""), "R15C");
        assert_eq!(normalize_radius("", "Tyre 195/65 R15"), "R15");
        assert_eq!(normalize_radius("n/a", ""), "");
    }

    #[test]
    fn vehicle_types() {
        assert_eq!(classify_vehicle_type("Continental VanContact", "R16C"), VehicleType::Cargo);
        assert_eq!(classify_vehicle_type("Kumho Cargo 185 R14", "R14"), VehicleType::Cargo);
        assert_eq!(classify_vehicle_type("Nexen Roadian SUV", "R17"), VehicleType::Suv);
        assert_eq!(classify_vehicle_type("Hankook Advantage", "R15"), VehicleType::Car);
    }
}
