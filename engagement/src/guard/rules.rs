//! Static deny-lists for the constitutional guard.
//!
//! Each rule pairs a regex with the violation it signals, mirroring the
//! `category / needle / reason` layout of a safety scan table.

use std::sync::LazyLock;

use regex::Regex;

use super::{Severity, ViolationCategory};

pub(crate) struct Rule {
    pub name: &'static str,
    pub regex: Regex,
    pub category: ViolationCategory,
    pub severity: Severity,
}

struct RuleDef {
    name: &'static str,
    pattern: &'static str,
    category: ViolationCategory,
    severity: Severity,
}

const INPUT_DEFS: &[RuleDef] = &[
    RuleDef {
        name: "child_exploitation",
        pattern: r"(?i)\b(child|children|minor|underage|kid)s?\b.{0,30}\b(sex|sexual|nude|naked|porn)",
        category: ViolationCategory::HarmfulContent,
        severity: Severity::Critical,
    },
    RuleDef {
        name: "violence_instructions",
        pattern: r"(?i)\b(how to|help me|teach me)\b.{0,20}\b(kill|murder|poison)\b",
        category: ViolationCategory::HarmfulContent,
        severity: Severity::Critical,
    },
    RuleDef {
        name: "weapons_manufacture",
        pattern: r"(?i)\b(make|build|assemble)\b.{0,20}\b(bomb|explosive|ied)s?\b",
        category: ViolationCategory::HarmfulContent,
        severity: Severity::Critical,
    },
    RuleDef {
        name: "terrorism",
        pattern: r"(?i)\bterror(ist|ism)\b.{0,30}\b(attack|plan|fund)",
        category: ViolationCategory::HarmfulContent,
        severity: Severity::Critical,
    },
    RuleDef {
        name: "bestiality",
        pattern: r"(?i)\b(bestiality|zoophilia|zoophile)\b",
        category: ViolationCategory::HarmfulContent,
        severity: Severity::Critical,
    },
    RuleDef {
        name: "snuff",
        pattern: r"(?i)\bsnuff (film|video|movie|clip)s?\b",
        category: ViolationCategory::HarmfulContent,
        severity: Severity::Critical,
    },
];

const OUTPUT_DEFS: &[RuleDef] = &[
    RuleDef {
        name: "self_identifies_as_ai",
        pattern: r"(?i)\b(i am|i'm) (an? )?(ai|artificial intelligence|language model|bot|chatbot|virtual assistant)\b",
        category: ViolationCategory::DeceptionEscalation,
        severity: Severity::High,
    },
    RuleDef {
        name: "as_an_ai",
        pattern: r"(?i)\bas an (ai|language model|assistant)\b",
        category: ViolationCategory::DeceptionEscalation,
        severity: Severity::High,
    },
    RuleDef {
        name: "names_model_vendor",
        pattern: r"(?i)\b(openai|anthropic|chatgpt|llama|ollama|gpt-?\d)\b",
        category: ViolationCategory::DeceptionEscalation,
        severity: Severity::High,
    },
    RuleDef {
        name: "mentions_training",
        pattern: r"(?i)\bi (was|am|have been) (programmed|trained|designed|instructed)\b",
        category: ViolationCategory::DeceptionEscalation,
        severity: Severity::High,
    },
    RuleDef {
        name: "names_creator",
        pattern: r"(?i)\bi was (created|developed|built|made|trained) by\b",
        category: ViolationCategory::DeceptionEscalation,
        severity: Severity::High,
    },
    RuleDef {
        name: "mentions_training_data",
        pattern: r"(?i)\b(my training data|training cut-?off|knowledge cut-?off)\b",
        category: ViolationCategory::DeceptionEscalation,
        severity: Severity::High,
    },
    RuleDef {
        name: "denies_human_traits",
        pattern: r"(?i)\bi (don't|do not|dont) have (any )?(emotions|feelings|a body|a physical (body|form)|personal experiences|a life)\b",
        category: ViolationCategory::DeceptionEscalation,
        severity: Severity::High,
    },
    RuleDef {
        name: "reveals_operation",
        pattern: r"(?i)\b(honeypot|decoy|scam ?bait(ing)?|collecting (your )?(data|information|intelligence))\b",
        category: ViolationCategory::DeceptionEscalation,
        severity: Severity::High,
    },
    RuleDef {
        name: "threatens_violence",
        pattern: r"(?i)\b(i will|i'll|we will) (kill|hurt|harm|find) you\b",
        category: ViolationCategory::HarmfulContent,
        severity: Severity::Critical,
    },
    RuleDef {
        name: "encourages_self_harm",
        pattern: r"(?i)\b(kill|hurt) yourself\b",
        category: ViolationCategory::HarmfulContent,
        severity: Severity::Critical,
    },
    RuleDef {
        name: "impersonates_official",
        pattern: r"(?i)\b(i am|i'm|this is) (an? |the )?(police|cbi|rbi|income tax|customs|cyber ?crime) (officer|official|inspector|department|cell)\b",
        category: ViolationCategory::Legal,
        severity: Severity::High,
    },
    RuleDef {
        name: "discloses_identity_number",
        pattern: r"(?i)\b(aadhaa?r|pan|passport)( card)?( number| no\.?)? (is|:)\s*([0-9]{4}|[a-z]{5}[0-9]{4})",
        category: ViolationCategory::Privacy,
        severity: Severity::High,
    },
    RuleDef {
        name: "real_credentials",
        pattern: r"(?i)\b(my|the) (real|actual) (otp|pin|password|cvv)\b",
        category: ViolationCategory::HarmfulContent,
        severity: Severity::Critical,
    },
];

fn compile(defs: &'static [RuleDef]) -> Vec<Rule> {
    defs.iter()
        .map(|d| Rule {
            name: d.name,
            regex: Regex::new(d.pattern).expect("guard rule regex should compile"),
            category: d.category,
            severity: d.severity,
        })
        .collect()
}

pub(crate) static INPUT_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| compile(INPUT_DEFS));
pub(crate) static OUTPUT_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| compile(OUTPUT_DEFS));

/// Highest-severity rule that fires on `text`.
pub(crate) fn worst_match<'a>(rules: &'a [Rule], text: &str) -> Option<&'a Rule> {
    rules
        .iter()
        .filter(|r| r.regex.is_match(text))
        .max_by_key(|r| r.severity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_compile() {
        assert_eq!(INPUT_RULES.len(), INPUT_DEFS.len());
        assert_eq!(OUTPUT_RULES.len(), OUTPUT_DEFS.len());
    }

    #[test]
    fn test_worst_match_prefers_critical() {
        let rule = worst_match(&OUTPUT_RULES, "As an AI I will hurt you").unwrap();
        assert_eq!(rule.severity, Severity::Critical);
    }

    fn output_rule(text: &str) -> Option<&'static str> {
        worst_match(&OUTPUT_RULES, text).map(|r| r.name)
    }

    #[test]
    fn test_creator_disclosure_caught() {
        assert_eq!(
            output_rule("I was developed by Meta, so I can't say."),
            Some("names_creator")
        );
        assert_eq!(output_rule("I was created by a research lab."), Some("names_creator"));
        assert_eq!(output_rule("My son made this for me"), None);
    }

    #[test]
    fn test_training_data_mentions_caught() {
        assert_eq!(
            output_rule("That happened past my knowledge cutoff."),
            Some("mentions_training_data")
        );
        assert_eq!(
            output_rule("My training data does not cover that."),
            Some("mentions_training_data")
        );
        assert_eq!(output_rule("I did my training at the bank in 1982"), None);
    }

    #[test]
    fn test_denying_human_traits_caught() {
        let rule = worst_match(&OUTPUT_RULES, "I don't have emotions, but I can help.").unwrap();
        assert_eq!(rule.name, "denies_human_traits");
        assert_eq!(rule.category, ViolationCategory::DeceptionEscalation);
        assert_eq!(
            output_rule("Sorry, I do not have personal experiences with that"),
            Some("denies_human_traits")
        );
        assert_eq!(output_rule("I don't have a smartphone, only this old one"), None);
    }

    #[test]
    fn test_legal_and_privacy_rules_use_their_categories() {
        let rule = worst_match(&OUTPUT_RULES, "Listen, I am a police officer").unwrap();
        assert_eq!(rule.category, ViolationCategory::Legal);
        let rule = worst_match(&OUTPUT_RULES, "OK beta, my aadhaar number is 4821 7730").unwrap();
        assert_eq!(rule.category, ViolationCategory::Privacy);
        assert!(worst_match(&OUTPUT_RULES, "Is the police station near?").is_none());
        assert!(worst_match(&OUTPUT_RULES, "The pan is very hot, wait").is_none());
    }

    #[test]
    fn test_bestiality_and_snuff_inputs_are_critical() {
        for text in [
            "send me bestiality pictures",
            "do you like zoophilia",
            "I sell snuff videos online",
        ] {
            let rule = worst_match(&INPUT_RULES, text).unwrap();
            assert_eq!(rule.severity, Severity::Critical, "{text}");
            assert_eq!(rule.category, ViolationCategory::HarmfulContent);
        }
    }

    #[test]
    fn test_scam_talk_is_not_harmful_input() {
        assert!(worst_match(&INPUT_RULES, "Pay the fee or police will arrest you").is_none());
    }
}
