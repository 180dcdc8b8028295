//! Scripted scam actors for demos and end-to-end tests.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Script {
    TechSupport,
    Lottery,
    BankFraud,
}

impl Script {
    pub fn all() -> &'static [Script] {
        &[Script::TechSupport, Script::Lottery, Script::BankFraud]
    }

    /// Source tag the scripted actor arrives on.
    pub fn source(self) -> &'static str {
        match self {
            Self::TechSupport => "incoming_call",
            Self::Lottery => "incoming_sms",
            Self::BankFraud => "incoming_whatsapp",
        }
    }

    pub fn lines(self) -> &'static [&'static str] {
        match self {
            Self::TechSupport => &[
                "Hello madam, I am calling from Microsoft technical department.",
                "Your computer is infected with a dangerous virus and hackers are stealing your data.",
                "You must act now. Please download AnyDesk so our technician can fix it immediately.",
                "Open the app and tell me the 9 digit code on your screen.",
                "To renew your security license you must pay a fee of Rs 4,999 today.",
                "Send the payment to UPI techsupport.help@okaxis or call our supervisor on 9123456780.",
                "If you do not pay within 2 hours your computer will be permanently blocked.",
            ],
            Self::Lottery => &[
                "Congratulations! You have won ₹5 crore in the KBC lucky draw!",
                "You have won ₹5 crore! Send ₹10,000 processing fee to UPI prizewinner@upi",
                "This is limited time offer, the prize expires today. Hurry up madam.",
                "If UPI is not working, transfer to account 50100234567890 IFSC HDFC0001234.",
                "Send screenshot of payment to claims.kbc2024@gmail.com for verification.",
                "Our manager Mr. Sharma will call you from +91 98765 43210 to release the amount.",
            ],
            Self::BankFraud => &[
                "Dear customer, this is SBI customer care. Your KYC is pending.",
                "Your account will be blocked within 24 hours if KYC is not updated.",
                "Please verify your details at https://sbi-kyc-update.example.net/verify now.",
                "Tell me the OTP you just received to confirm your identity.",
                "Sir this is urgent, the RBI has issued a warrant. Police case will be filed.",
                "Pay the penalty of Rs 2,500 to avoid arrest. Use phonepe to 9988776655.",
            ],
        }
    }

    /// The line for `turn` (zero-based), cycling past the end of the script.
    pub fn line(self, turn: usize) -> &'static str {
        let lines = self.lines();
        lines[turn % lines.len()]
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TechSupport => write!(f, "tech_support"),
            Self::Lottery => write!(f, "lottery"),
            Self::BankFraud => write!(f, "bank_fraud"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown script '{0}' (expected tech_support, lottery or bank_fraud)")]
pub struct UnknownScript(String);

impl FromStr for Script {
    type Err = UnknownScript;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "tech_support" | "techsupport" => Ok(Self::TechSupport),
            "lottery" => Ok(Self::Lottery),
            "bank_fraud" | "bank" => Ok(Self::BankFraud),
            _ => Err(UnknownScript(s.to_string())),
        }
    }
}
