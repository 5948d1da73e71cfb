/*!
    decoding of the values and names returned by remote dictionary reads.

    Devices answer with the textual representation of a value. Its interpretation is driven by the data type declared in the IDN attribute word instead of evaluating the text as an expression, so a value that does not match its declared type is reported instead of silently coerced.
*/

use crate::attribute::{AttributeFields, DataType};
use core::fmt;
use serde::{Serialize, Deserialize};


/// decoded value of a dictionary entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Text(String),
    /// variable length list of integers, such as IDN lists
    List(Vec<i64>),
    /// raw content of an object that has no textual meaning
    Bytes(Vec<u8>),
}

impl Value {
    /// numeric value as a float, if this value is a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }
    pub fn as_list(&self) -> Option<&[i64]> {
        match self {
            Self::List(values) => Some(values),
            _ => None,
        }
    }
    /// true for text values containing nothing but whitespaces, such values are never written back to a device
    pub fn is_blank(&self) -> bool {
        matches!(self, Self::Text(text) if text.trim().is_empty())
    }
}

/// the textual form sent to devices in write requests
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{}", value),
            Self::Float(value) => write!(f, "{:?}", value),
            Self::Text(text) => f.write_str(text),
            Self::List(values) => write_list(f, values.iter()),
            Self::Bytes(bytes) => write_list(f, bytes.iter()),
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: impl Iterator<Item=T>) -> fmt::Result {
    f.write_str("[")?;
    for (i, item) in items.enumerate() {
        if i != 0 {f.write_str(", ")?;}
        write!(f, "{}", item)?;
    }
    f.write_str("]")
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {Self::Integer(value)}
}
impl From<i32> for Value {
    fn from(value: i32) -> Self {Self::Integer(value.into())}
}
impl From<f64> for Value {
    fn from(value: f64) -> Self {Self::Float(value)}
}
impl From<&str> for Value {
    fn from(value: &str) -> Self {Self::Text(value.into())}
}


/**
    decode a value sent by a device

    `fields` is the decoded attribute word of the IDN if known. Without it, the type is guessed from the text itself.
    The error is a short description of the mismatch.
*/
pub fn decode_value(text: &str, fields: Option<AttributeFields>) -> Result<Value, &'static str> {
    let text = text.trim();
    if text.is_empty()
        {return Ok(Value::Text(String::new()))}
    let fields = match fields {
        Some(fields) => fields,
        None => return Ok(guess(text)),
    };

    if fields.datalength().is_variable() && fields.datatype != DataType::ExtCharset {
        return parse_list(text)
            .map(Value::List)
            .ok_or("expected a list of integers");
    }
    match fields.datatype {
        DataType::ExtCharset | DataType::Reserved => Ok(Value::Text(unquote(text).into())),
        DataType::Float => parse_float(text)
            .map(Value::Float)
            .ok_or("expected a float"),
        DataType::UnsignedHex => parse_integer(text)
            .map(Value::Integer)
            .ok_or("expected an hexadecimal integer"),
        DataType::Number
        | DataType::UnsignedDecimal
        | DataType::SignedDecimal
        | DataType::Unsigned => {
            if let Some(value) = parse_integer(text)
                {Ok(Value::Integer(value))}
            // a scaled value can be sent with its decimal point
            else if fields.decimalpoint != 0
                {parse_float(text).map(Value::Float).ok_or("expected a decimal number")}
            else
                {Err("expected an integer")}
        },
    }
}

fn guess(text: &str) -> Value {
    if let Some(value) = parse_integer(text)   {Value::Integer(value)}
    else if let Some(value) = parse_float(text)   {Value::Float(value)}
    else if let Some(values) = parse_list(text)   {Value::List(values)}
    else   {Value::Text(unquote(text).into())}
}

/// parse a decimal or `0x` prefixed integer, with an optional sign
pub(crate) fn parse_integer(text: &str) -> Option<i64> {
    let text = text.trim();
    // legacy long integer suffix
    let text = text.strip_suffix('L').unwrap_or(text);
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let magnitude = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        // the sign is only accepted before the prefix
        if hex.is_empty() || ! hex.bytes().all(|c| c.is_ascii_hexdigit())
            {return None}
        i64::from_str_radix(hex, 16).ok()?
    } else {
        if digits.is_empty() || ! digits.bytes().all(|c| c.is_ascii_digit())
            {return None}
        digits.parse::<i64>().ok()?
    };
    Some(if negative {-magnitude} else {magnitude})
}

fn parse_float(text: &str) -> Option<f64> {
    let value = text.trim().parse::<f64>().ok()?;
    value.is_finite().then_some(value)
}

fn parse_list(text: &str) -> Option<Vec<i64>> {
    let inner = text.trim();
    let inner = inner.strip_prefix('[').and_then(|t| t.strip_suffix(']'))
        .or_else(|| inner.strip_prefix('(').and_then(|t| t.strip_suffix(')')))?;
    inner.split(',')
        .map(str::trim)
        .filter(|item| ! item.is_empty())
        .map(parse_integer)
        .collect()
}

/// remove the quotes around a string representation, if any
fn unquote(text: &str) -> &str {
    let text = text.strip_prefix('u').filter(|t| t.starts_with(['\'', '"'])).unwrap_or(text);
    for quote in ['\'', '"'] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote)
            {return &text[1 .. text.len()-1]}
    }
    text
}


/// upper half of the IBM PC code page 437, the lower half is ASCII
const CP437_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å',
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ',
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»',
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐',
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧',
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀',
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩',
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{a0}',
];

/// decode text sent by a SERCOS device, which uses code page 437
pub fn decode_cp437(bytes: &[u8]) -> String {
    bytes.iter()
        .map(|&b| if b < 0x80 {char::from(b)} else {CP437_HIGH[usize::from(b - 0x80)]})
        .collect()
}

/// decode text sent by a CANopen device, which uses latin-1
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}
