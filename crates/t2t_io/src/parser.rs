use crate::LoadError;
use nom::IResult;
use nom::branch::alt;
use nom::bytes::complete::take_while1;
use nom::character::complete::{char, digit1, space0, space1};
use nom::combinator::{all_consuming, map, map_res, value};
use nom::number::complete::double;
use nom::sequence::{delimited, separated_pair};
use t2t_core::price::FixedPrice;

/// One `SYMBOL,INDEX` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    pub name: String,
    pub index: u16,
}

/// One `INDEX,PRICE` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceEntry {
    pub index: u16,
    pub price: FixedPrice,
}

/// A comma with optional blanks around it, or a run of blanks.
fn separator(input: &str) -> IResult<&str, ()> {
    alt((
        value((), delimited(space0, char(','), space0)),
        value((), space1),
    ))(input)
}

fn ticker(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace() && c != ',')(input)
}

fn index(input: &str) -> IResult<&str, u16> {
    map_res(digit1, str::parse)(input)
}

pub fn symbol_line(input: &str) -> IResult<&str, SymbolEntry> {
    map(separated_pair(ticker, separator, index), |(name, index)| {
        SymbolEntry {
            name: name.to_owned(),
            index,
        }
    })(input)
}

pub fn price_line(input: &str) -> IResult<&str, (u16, f64)> {
    separated_pair(index, separator, double)(input)
}

/// Trimmed content lines with their 1-based line numbers.
fn content_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

fn parse_error(line: usize, text: &str, reason: &'static str) -> LoadError {
    LoadError::Parse {
        line,
        text: text.to_owned(),
        reason,
    }
}

pub fn parse_symbols(text: &str) -> Result<Vec<SymbolEntry>, LoadError> {
    content_lines(text)
        .map(|(no, line)| {
            all_consuming(symbol_line)(line)
                .map(|(_, entry)| entry)
                .map_err(|_| parse_error(no, line, "expected SYMBOL,INDEX"))
        })
        .collect()
}

pub fn parse_prices(text: &str) -> Result<Vec<PriceEntry>, LoadError> {
    content_lines(text)
        .map(|(no, line)| {
            let (_, (index, price)) = all_consuming(price_line)(line)
                .map_err(|_| parse_error(no, line, "expected INDEX,PRICE"))?;
            let price = FixedPrice::from_decimal(price)
                .ok_or_else(|| parse_error(no, line, "price out of range"))?;
            Ok(PriceEntry { index, price })
        })
        .collect()
}
