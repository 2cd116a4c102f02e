//! Line-protocol parser.
//!
//! `<measurement>,tag=value[,...] field=value[,...] [timestamp_ns]` where
//! the measurement is the property URI and the `item` tag carries the item
//! URI. Unquoted tokens backslash-escape `,` `=` space, tab, `"` and `\`.
//! An `i`-suffixed field is an integer, a bare number a double, `t`/`f` a
//! boolean and a quoted string a string. A present timestamp is
//! nanoseconds and divided down to milliseconds; an absent one falls back
//! to the parser's wall-clock default.

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag},
    character::complete::{char, digit1, space0, space1},
    combinator::{map, map_res, opt, recognize, value},
    multi::many0,
    sequence::{pair, preceded, separated_pair, tuple},
    IResult,
};

use super::ParseError;
use crate::model::{Tuple, Uri, Value};

pub struct LineProtocolParser {
    context: Uri,
    default_time: i64,
}

impl LineProtocolParser {
    pub fn new(context: Uri) -> Self {
        LineProtocolParser {
            context,
            default_time: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Parser with an injected wall-clock time for lines without a
    /// timestamp.
    pub fn with_default_time(context: Uri, default_time: i64) -> Self {
        LineProtocolParser {
            context,
            default_time,
        }
    }

    /// Parses a whole text, one tuple per field per non-empty line.
    /// Lines starting with `#` are comments.
    pub fn parse(&self, input: &str) -> Result<Vec<Tuple>, ParseError> {
        let mut tuples = Vec::new();
        for line in input.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            tuples.extend(self.parse_line(line)?);
        }
        Ok(tuples)
    }

    pub fn parse_line(&self, line: &str) -> Result<Vec<Tuple>, ParseError> {
        let (rest, parsed) =
            parse_line(line).map_err(|_| ParseError::MalformedLine(line.to_string()))?;
        if !rest.is_empty() {
            return Err(ParseError::MalformedLine(line.to_string()));
        }
        let item = parsed
            .tags
            .iter()
            .find(|(key, _)| key == "item")
            .map(|(_, value)| value.clone())
            .ok_or_else(|| ParseError::MissingItem(line.to_string()))?;
        let time = match parsed.timestamp {
            Some(nanos) => nanos / 1_000_000,
            None => self.default_time,
        };
        Ok(parsed
            .fields
            .into_iter()
            .map(|(_, value)| Tuple {
                item: Uri::new(item.clone()),
                property: Uri::new(parsed.measurement.clone()),
                context: self.context.clone(),
                time,
                seq_nr: 0,
                value,
            })
            .collect())
    }
}

struct ParsedLine {
    measurement: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, Value)>,
    timestamp: Option<i64>,
}

fn parse_line(input: &str) -> IResult<&str, ParsedLine> {
    let (input, measurement) = escaped_token(input)?;
    let (input, tags) = many0(preceded(
        char(','),
        separated_pair(escaped_token, char('='), escaped_token),
    ))(input)?;
    let (input, _) = space1(input)?;
    let (input, first_field) = field(input)?;
    let (input, mut fields) = many0(preceded(char(','), field))(input)?;
    fields.insert(0, first_field);
    let (input, timestamp) = opt(preceded(
        space1,
        map_res(recognize(pair(opt(char('-')), digit1)), str::parse::<i64>),
    ))(input)?;
    let (input, _) = space0(input)?;
    Ok((
        input,
        ParsedLine {
            measurement,
            tags,
            fields,
            timestamp,
        },
    ))
}

fn field(input: &str) -> IResult<&str, (String, Value)> {
    separated_pair(escaped_token, char('='), field_value)(input)
}

fn escaped_token(input: &str) -> IResult<&str, String> {
    escaped_transform(is_not(",= \t\"\\"), '\\', escape_char)(input)
}

fn escape_char(input: &str) -> IResult<&str, &str> {
    alt((
        value(",", tag(",")),
        value("=", tag("=")),
        value(" ", tag(" ")),
        value("\t", tag("\t")),
        value("\"", tag("\"")),
        value("\\", tag("\\")),
    ))(input)
}

fn field_value(input: &str) -> IResult<&str, Value> {
    alt((map(quoted_string, Value::String), boolean, number))(input)
}

fn quoted_string(input: &str) -> IResult<&str, String> {
    let (input, _) = char('"')(input)?;
    let (input, content) = opt(escaped_transform(is_not("\"\\"), '\\', escape_char))(input)?;
    let (input, _) = char('"')(input)?;
    Ok((input, content.unwrap_or_default()))
}

fn boolean(input: &str) -> IResult<&str, Value> {
    alt((
        value(Value::Bool(true), alt((tag("true"), tag("t")))),
        value(Value::Bool(false), alt((tag("false"), tag("f")))),
    ))(input)
}

fn number(input: &str) -> IResult<&str, Value> {
    let (input, digits) = recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit1)),
    )))(input)?;
    let (input, integer) = opt(char('i'))(input)?;
    if integer.is_some() {
        match digits.parse::<i64>() {
            Ok(v) if i32::try_from(v).is_ok() => Ok((input, Value::Int(v as i32))),
            Ok(v) => Ok((input, Value::Long(v))),
            Err(_) => Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Digit,
            ))),
        }
    } else {
        match digits.parse::<f64>() {
            Ok(v) => Ok((input, Value::Double(v))),
            Err(_) => Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Float,
            ))),
        }
    }
}
