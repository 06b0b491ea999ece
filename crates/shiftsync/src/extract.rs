//! Schedule page parsing.
//!
//! Works on the serialized DOM read from the driver. Parsing is pure, so the
//! extractor needs no browser to test.

use scraper::{ElementRef, Html, Selector};

use crate::config::{ConfigError, ScheduleSelectors};
use crate::model::{PayPeriodOption, ShiftRecord};

/// Elements whose boundaries end a line of visible text.
const BLOCK_ELEMENTS: &[&str] = &["div", "p", "li", "tr"];

/// Elements whose content is never part of a cell's visible text. A nested
/// table's text belongs to its own cells.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "template", "noscript", "table"];

/// Shifts and, when requested, the forward pay periods found on one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub shifts: Vec<ShiftRecord>,
    pub pay_periods: Option<Vec<PayPeriodOption>>,
}

#[derive(Debug, Clone)]
pub struct ScheduleExtractor {
    table: Selector,
    period_select: Selector,
    option: Selector,
}

impl ScheduleExtractor {
    pub fn new(selectors: &ScheduleSelectors) -> Result<Self, ConfigError> {
        Ok(Self {
            table: parse_selector(&selectors.table)?,
            period_select: parse_selector(&selectors.period_select)?,
            option: parse_selector("option")?,
        })
    }

    pub fn extract(&self, html: &str, wants_pay_periods: bool) -> Extraction {
        let document = Html::parse_document(html);

        let shifts = document
            .select(&self.table)
            .next()
            .map(shifts_in)
            .unwrap_or_default();

        let pay_periods = wants_pay_periods.then(|| self.pay_periods(&document));

        Extraction {
            shifts,
            pay_periods,
        }
    }

    /// Options from the selected one onwards, in control order.
    fn pay_periods(&self, document: &Html) -> Vec<PayPeriodOption> {
        let Some(select) = document.select(&self.period_select).next() else {
            return Vec::new();
        };

        let options: Vec<ElementRef<'_>> = select.select(&self.option).collect();
        // No `selected` attribute means the browser shows the first option.
        let start = options
            .iter()
            .position(|option| option.value().attr("selected").is_some())
            .unwrap_or(0);

        options
            .iter()
            .enumerate()
            .skip(start)
            .map(|(index, option)| PayPeriodOption {
                id: option_id(*option),
                is_selected: index == start,
            })
            .collect()
    }
}

fn parse_selector(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector).map_err(|e| ConfigError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

fn shifts_in(table: ElementRef<'_>) -> Vec<ShiftRecord> {
    body_rows(table)
        .into_iter()
        .filter(|row| !is_hidden(*row))
        .flat_map(|row| {
            row.children()
                .filter_map(ElementRef::wrap)
                .filter(|cell| cell.value().name() == "td" && !is_hidden(*cell))
        })
        .filter_map(|cell| shift_from_lines(cell_lines(cell)))
        .collect()
}

/// Rows that belong to `table` itself; rows of nested tables are excluded.
fn body_rows(table: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    let mut rows = Vec::new();
    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "tr" => rows.push(child),
            "tbody" | "tfoot" => rows.extend(
                child
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|row| row.value().name() == "tr"),
            ),
            _ => {}
        }
    }
    rows
}

fn shift_from_lines(lines: Vec<String>) -> Option<ShiftRecord> {
    let mut lines = lines.into_iter();
    let day = lines.next()?;
    let date = lines.next()?;
    let code = lines.next().unwrap_or_default();
    Some(ShiftRecord { day, date, code })
}

/// Non-empty lines of visible text, whitespace collapsed.
fn cell_lines(cell: ElementRef<'_>) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    collect_lines(cell, &mut current, &mut lines);
    end_line(&mut current, &mut lines);
    lines
}

fn collect_lines(element: ElementRef<'_>, current: &mut String, lines: &mut Vec<String>) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            let mut parts = text.split('\n');
            if let Some(first) = parts.next() {
                current.push_str(first);
            }
            for part in parts {
                end_line(current, lines);
                current.push_str(part);
            }
            continue;
        }

        let Some(child) = ElementRef::wrap(child) else {
            continue;
        };
        match child.value().name() {
            name if SKIPPED_ELEMENTS.contains(&name) => {}
            _ if is_hidden(child) => {}
            "br" => end_line(current, lines),
            name if BLOCK_ELEMENTS.contains(&name) => {
                end_line(current, lines);
                collect_lines(child, current, lines);
                end_line(current, lines);
            }
            _ => collect_lines(child, current, lines),
        }
    }
}

/// Hidden through the `hidden` attribute or an inline `display: none`.
fn is_hidden(element: ElementRef<'_>) -> bool {
    let element = element.value();
    if element.attr("hidden").is_some() {
        return true;
    }
    element.attr("style").is_some_and(|style| {
        style
            .split(';')
            .filter_map(|declaration| declaration.split_once(':'))
            .any(|(property, value)| {
                property.trim().eq_ignore_ascii_case("display")
                    && value.trim().to_ascii_lowercase().starts_with("none")
            })
    })
}

fn end_line(current: &mut String, lines: &mut Vec<String>) {
    let line = current.split_whitespace().collect::<Vec<_>>().join(" ");
    if !line.is_empty() {
        lines.push(line);
    }
    current.clear();
}

fn option_id(option: ElementRef<'_>) -> String {
    match option.value().attr("value") {
        Some(value) => value.to_string(),
        None => option.text().collect::<String>().trim().to_string(),
    }
}
