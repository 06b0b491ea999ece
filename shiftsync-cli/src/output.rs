use anyhow::Result;
#[cfg(feature = "colored-output")]
use colored::*;
use shiftsync::RetrievalResult;
#[cfg(feature = "table-output")]
use tabled::{Table, Tabled, settings::Style};

use crate::cli::OutputFormat;

pub struct OutputManager {
    colored: bool,
}

enum Color {
    Green,
    Yellow,
    Cyan,
    Dimmed,
}

impl OutputManager {
    pub fn new(colored: bool) -> Self {
        Self { colored }
    }

    pub fn format_result(&self, result: &RetrievalResult, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Pretty => Ok(self.format_pretty(result)),
            OutputFormat::Json => Ok(serde_json::to_string_pretty(result)?),
        }
    }

    fn format_pretty(&self, result: &RetrievalResult) -> String {
        let mut output = String::new();

        let heading = match &result.requested_period_id {
            Some(period) => format!("Schedule for pay period {}", period),
            None => "Current schedule".to_string(),
        };
        output.push_str(&self.colorize(&heading, Color::Green, true));
        output.push('\n');
        output.push_str(&self.format_shifts(result));
        output.push('\n');

        if let Some(periods) = &result.pay_periods {
            output.push_str(&self.colorize("Pay periods:", Color::Green, true));
            output.push('\n');
            for period in periods {
                let marker = if period.is_selected { "*" } else { " " };
                let id = if period.is_selected {
                    self.colorize(&period.id, Color::Cyan, true)
                } else {
                    period.id.clone()
                };
                output.push_str(&format!("  {} {}\n", marker, id));
            }
        }

        output.push_str(&format!(
            "{}: {}\n",
            self.colorize("Cookies", Color::Yellow, false),
            self.colorize(&result.refreshed_cookies.to_string(), Color::Dimmed, false)
        ));
        output
    }

    #[cfg(feature = "table-output")]
    fn format_shifts(&self, result: &RetrievalResult) -> String {
        #[derive(Tabled)]
        struct ShiftRow<'a> {
            #[tabled(rename = "Day")]
            day: &'a str,
            #[tabled(rename = "Date")]
            date: &'a str,
            #[tabled(rename = "Code")]
            code: &'a str,
        }

        let rows = result.shifts.iter().map(|shift| ShiftRow {
            day: &shift.day,
            date: &shift.date,
            code: if shift.code.is_empty() { "-" } else { shift.code.as_str() },
        });
        Table::new(rows).with(Style::modern()).to_string()
    }

    #[cfg(not(feature = "table-output"))]
    fn format_shifts(&self, result: &RetrievalResult) -> String {
        result
            .shifts
            .iter()
            .map(|shift| {
                let code = if shift.code.is_empty() { "-" } else { shift.code.as_str() };
                format!("  {:<4} {:<8} {}", shift.day, shift.date, code)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn colorize(&self, text: &str, color: Color, bold: bool) -> String {
        #[cfg(feature = "colored-output")]
        {
            if self.colored {
                let colored_text = match color {
                    Color::Green => text.green(),
                    Color::Yellow => text.yellow(),
                    Color::Cyan => text.cyan(),
                    Color::Dimmed => text.dimmed(),
                };
                if bold {
                    colored_text.bold().to_string()
                } else {
                    colored_text.to_string()
                }
            } else {
                text.to_string()
            }
        }

        #[cfg(not(feature = "colored-output"))]
        {
            let _ = (self.colored, color, bold);
            text.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use shiftsync::{CookieRecord, PayPeriodOption, ShiftRecord};

    use super::*;

    fn result() -> RetrievalResult {
        RetrievalResult {
            shifts: vec![
                ShiftRecord {
                    day: "Mon".into(),
                    date: "03/03".into(),
                    code: "D1".into(),
                },
                ShiftRecord {
                    day: "Tue".into(),
                    date: "03/04".into(),
                    code: String::new(),
                },
            ],
            pay_periods: Some(vec![PayPeriodOption {
                id: "202502".into(),
                is_selected: true,
            }]),
            requested_period_id: None,
            refreshed_cookies: std::iter::once(CookieRecord::new(
                "PORTALSESSION",
                "secret-value",
                "schedule.example.org",
            ))
            .collect(),
        }
    }

    #[test]
    fn test_pretty_output_hides_cookie_values() {
        let output = OutputManager::new(false)
            .format_result(&result(), OutputFormat::Pretty)
            .unwrap();

        assert!(output.contains("Current schedule"));
        assert!(output.contains("Mon"));
        assert!(output.contains("* 202502"));
        assert!(output.contains("PORTALSESSION"));
        assert!(!output.contains("secret-value"));
    }

    #[test]
    fn test_json_output_shape() {
        let output = OutputManager::new(false)
            .format_result(&result(), OutputFormat::Json)
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();

        assert_eq!(value["shifts"][1]["code"], "");
        assert_eq!(value["payPeriods"][0]["isSelected"], true);
        assert_eq!(value["cookies"][0]["value"], "secret-value");
        assert!(value.get("payPeriod").is_none());
    }
}
