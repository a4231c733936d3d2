//! Decimal and amount parsing.

use super::{Filter, Scope};
use crate::error::FilterError;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// How separators are read in a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecimalFormat {
    /// The last of `.`/`,` is the decimal separator when both occur; a lone
    /// comma followed by at most two digits is decimal, otherwise grouping.
    #[default]
    Auto,
    /// `1.234,56`: dots group, the comma is decimal.
    European,
    /// `1,234.56`: commas group, the dot is decimal.
    Us,
}

/// Sign rule applied after parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sign {
    #[default]
    AsParsed,
    /// Flip the parsed sign (debit columns shown without minus).
    Negate,
    Positive,
    Negative,
}

impl Sign {
    fn apply(self, value: Decimal) -> Decimal {
        match self {
            Sign::AsParsed => value,
            Sign::Negate => -value,
            Sign::Positive => value.abs(),
            Sign::Negative => -value.abs(),
        }
    }
}

/// Parse an amount as displayed on a page: currency symbols, spaces and
/// other decoration are ignored; a minus sign anywhere or surrounding
/// parentheses make it negative.
pub fn parse_decimal(text: &str, format: DecimalFormat) -> Result<Decimal, FilterError> {
    let trimmed = text.trim();
    let negative = trimmed.contains('-')
        || trimmed.contains('\u{2212}')
        || (trimmed.starts_with('(') && trimmed.ends_with(')'));

    let cleaned: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return Err(FilterError::InvalidDecimal(text.to_string()));
    }

    let normalized = match format {
        DecimalFormat::European => cleaned.replace('.', "").replace(',', "."),
        DecimalFormat::Us => cleaned.replace(',', ""),
        DecimalFormat::Auto => normalize_auto(&cleaned),
    };

    let value = Decimal::from_str(&normalized)
        .map_err(|_| FilterError::InvalidDecimal(text.to_string()))?;
    Ok(if negative { -value } else { value })
}

fn normalize_auto(cleaned: &str) -> String {
    if cleaned.contains(',') && cleaned.contains('.') {
        // Both present: the last one is the decimal separator
        if cleaned.rfind(',') > cleaned.rfind('.') {
            cleaned.replace('.', "").replace(',', ".")
        } else {
            cleaned.replace(',', "")
        }
    } else if cleaned.contains(',') {
        let after_comma = cleaned.rsplit(',').next().unwrap_or("");
        if after_comma.len() <= 2 && cleaned.matches(',').count() == 1 {
            cleaned.replace(',', ".")
        } else {
            cleaned.replace(',', "")
        }
    } else if cleaned.matches('.').count() > 1 {
        cleaned.replace('.', "")
    } else {
        cleaned.to_string()
    }
}

fn has_digit(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit())
}

/// Decimal number read from the text produced by `inner`.
#[derive(Debug, Clone)]
pub struct CleanDecimal<F> {
    inner: F,
    format: DecimalFormat,
    sign: Sign,
    round: Option<u32>,
}

impl<F> CleanDecimal<F> {
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            format: DecimalFormat::Auto,
            sign: Sign::AsParsed,
            round: None,
        }
    }

    pub fn european(self) -> Self {
        self.format(DecimalFormat::European)
    }

    pub fn us(self) -> Self {
        self.format(DecimalFormat::Us)
    }

    pub fn format(mut self, format: DecimalFormat) -> Self {
        self.format = format;
        self
    }

    pub fn sign(mut self, sign: Sign) -> Self {
        self.sign = sign;
        self
    }

    /// Round to `places` decimals, halves away from zero.
    pub fn round(mut self, places: u32) -> Self {
        self.round = Some(places);
        self
    }
}

impl<F: Filter<Output = String>> Filter for CleanDecimal<F> {
    type Output = Decimal;

    fn apply(&self, scope: &Scope<'_>) -> Result<Decimal, FilterError> {
        let text = self.inner.apply(scope)?;
        let value = self.sign.apply(parse_decimal(&text, self.format)?);
        Ok(match self.round {
            Some(places) => {
                value.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero)
            }
            None => value,
        })
    }
}

/// Signed amount from a credit column and a debit column.
///
/// A non-zero debit wins and is always negative; otherwise the credit is
/// returned as parsed. Empty cells count as absent; both absent is an error.
#[derive(Debug, Clone)]
pub struct Amount<C, D> {
    credit: C,
    debit: D,
    format: DecimalFormat,
}

impl<C, D> Amount<C, D> {
    pub fn new(credit: C, debit: D) -> Self {
        Self {
            credit,
            debit,
            format: DecimalFormat::Auto,
        }
    }

    pub fn format(mut self, format: DecimalFormat) -> Self {
        self.format = format;
        self
    }
}

impl<C, D> Filter for Amount<C, D>
where
    C: Filter<Output = String>,
    D: Filter<Output = String>,
{
    type Output = Decimal;

    fn apply(&self, scope: &Scope<'_>) -> Result<Decimal, FilterError> {
        let mut zero_debit = false;
        if let Some(text) = present(self.debit.apply(scope))? {
            let debit = parse_decimal(&text, self.format)?;
            if !debit.is_zero() {
                return Ok(-debit.abs());
            }
            zero_debit = true;
        }

        match present(self.credit.apply(scope))? {
            Some(text) => parse_decimal(&text, self.format),
            None if zero_debit => Ok(Decimal::ZERO),
            None => Err(FilterError::InvalidDecimal(String::new())),
        }
    }
}

/// A column value that may be missing: an absent element or a cell without
/// digits is `None`, any other failure is propagated.
fn present(value: Result<String, FilterError>) -> Result<Option<String>, FilterError> {
    match value {
        Ok(text) if has_digit(&text) => Ok(Some(text)),
        Ok(_) | Err(FilterError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
