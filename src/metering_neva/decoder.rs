use super::structs::{DeviceType, ScaledValue, TariffReadings};
use super::NevaError;
use log::debug;

pub const MAX_VBAT_MV: u32 = 3100;
pub const MIN_VBAT_MV: u32 = 2200;

/// At most this many digits after the point are taken into account
const MAX_FRACTION_DIGITS: usize = 4;

fn leading_digits(s: &[u8]) -> usize {
    s.iter().take_while(|c| c.is_ascii_digit()).count()
}

/// Lenient number parsing: leading digits count, the first non digit ends the number
pub fn str2uint(s: &[u8]) -> u64 {
    s.iter()
        .take_while(|c| c.is_ascii_digit())
        .fold(0u64, |num, c| num.saturating_mul(10).saturating_add((c - b'0') as u64))
}

/// `123.45` style text into a fixed point value
fn parse_decimal(text: &[u8]) -> ScaledValue {
    let point = match text.iter().position(|c| *c == b'.') {
        Some(p) => p,
        None => return ScaledValue::integer(str2uint(text)),
    };

    let integer = str2uint(&text[..point]);
    let fraction = &text[point + 1..];
    let digits = leading_digits(fraction).min(MAX_FRACTION_DIGITS);
    let scale = 10u64.pow(digits as u32);

    ScaledValue::new(
        integer.saturating_mul(scale).saturating_add(str2uint(&fraction[..digits])),
        scale as u32,
    )
}

fn bracket_content(payload: &[u8]) -> Result<&[u8], NevaError> {
    let open = payload.iter().position(|c| *c == b'(')
        .ok_or_else(|| NevaError::InvalidFormat("no opening bracket".to_string()))?;
    let close = payload[open + 1..].iter().position(|c| *c == b')')
        .ok_or_else(|| NevaError::InvalidFormat("no closing bracket".to_string()))?;
    Ok(&payload[open + 1..open + 1 + close])
}

/// Value of the first `(...)` group
pub fn number_from_brackets(payload: &[u8]) -> Result<ScaledValue, NevaError> {
    Ok(parse_decimal(bracket_content(payload)?))
}

/// Next field of a `(a,b,c)` list. Returns the value and how many bytes were consumed,
/// separator included.
pub fn number_from_tariffs(payload: &[u8]) -> Result<(ScaledValue, usize), NevaError> {
    let start = if payload.first() == Some(&b'(') { 1 } else { 0 };
    let end = payload[start..].iter().position(|c| *c == b',' || *c == b')')
        .ok_or_else(|| NevaError::InvalidFormat("unterminated tariff field".to_string()))?;

    let value = parse_decimal(&payload[start..start + end]);
    Ok((value, start + end + 1))
}

pub fn str_from_brackets(payload: &[u8]) -> Result<String, NevaError> {
    Ok(String::from_utf8_lossy(bracket_content(payload)?).into_owned())
}

/// Reads the type number following the first `.` of the identification line.
/// A bare `/` means the meter answered without ident, those are 6102 meters.
pub fn device_type_from_login(line: &[u8]) -> DeviceType {
    if line == b"/" {
        debug!("Login answer without ident, assuming 6102");
        return DeviceType::Type6102;
    }

    let dot = match line.iter().position(|c| *c == b'.') {
        Some(d) => d,
        None => return DeviceType::Unknown,
    };
    let code = &line[dot + 1..line.len().min(dot + 5)];
    debug!("Parsed type string: '{}'", String::from_utf8_lossy(code));

    DeviceType::from_code(str2uint(code))
}

fn read_fields<const N: usize>(mut payload: &[u8]) -> Result<[ScaledValue; N], NevaError> {
    let mut fields = [ScaledValue::integer(0); N];
    for field in fields.iter_mut() {
        let (value, consumed) = number_from_tariffs(payload)?;
        *field = value;
        payload = &payload[consumed.min(payload.len())..];
    }
    Ok(fields)
}

/// 6102: `(total,t1,t2,t3,t4)`
pub fn tariffs_6102(payload: &[u8]) -> Result<TariffReadings, NevaError> {
    let open = payload.iter().position(|c| *c == b'(')
        .ok_or_else(|| NevaError::InvalidFormat("no tariff list".to_string()))?;
    let [total, t1, t2, t3, t4] = read_fields::<5>(&payload[open..])?;

    Ok(TariffReadings { total, tariffs: [t1, t2, t3, t4] })
}

/// 7109: four tariffs after the `]`, the meter does not send the total
pub fn tariffs_7109(payload: &[u8]) -> Result<TariffReadings, NevaError> {
    let close = payload.iter().position(|c| *c == b']')
        .ok_or_else(|| NevaError::InvalidFormat("no tariff list".to_string()))?;
    let tariffs = read_fields::<4>(&payload[close + 1..])?;
    let total = tariffs.iter().fold(ScaledValue::integer(0), |sum, t| sum + *t);

    Ok(TariffReadings { total, tariffs })
}

pub fn decode_tariffs(device_type: DeviceType, payload: &[u8]) -> Result<TariffReadings, NevaError> {
    match device_type {
        DeviceType::Type6102 => tariffs_6102(payload),
        DeviceType::Type7109 => tariffs_7109(payload),
        DeviceType::Unknown => Err(NevaError::DeviceUnknown),
    }
}

/// Power is reported without a usable decimal point, the divisor depends on the family.
/// 7109 meters report a hundred times the 6102 resolution; the division by 100 runs
/// before the 16 bit overflow guard.
pub fn scale_power(device_type: DeviceType, reading: ScaledValue) -> ScaledValue {
    let mut raw = reading.raw;
    let mut divisor: u32 = 1000;

    if device_type == DeviceType::Type7109 {
        if raw == 0 {
            return ScaledValue::integer(0);
        }
        raw /= 100;
    }

    if raw > 0xffff {
        raw /= 10;
        divisor /= 10;
    }

    ScaledValue::new(raw & 0xffff, divisor)
}

/// Battery voltage out of the sensor block `(x,V.vv,...)`
pub fn battery_millivolts(payload: &[u8]) -> Result<u32, NevaError> {
    let open = payload.iter().position(|c| *c == b'(')
        .ok_or_else(|| NevaError::InvalidFormat("no sensor data".to_string()))?;
    let rest = &payload[open + 1..];
    let comma = rest.iter().position(|c| *c == b',')
        .ok_or_else(|| NevaError::InvalidFormat("no battery field".to_string()))?;
    let field = &rest[comma + 1..];

    let volts = str2uint(&field[..field.len().min(1)]);
    let hundredths = if field.len() > 2 { str2uint(&field[2..]) } else { 0 };

    Ok(volts.saturating_mul(1000).saturating_add(hundredths.saturating_mul(10)).min(u32::MAX as u64) as u32)
}

pub fn battery_level(millivolts: u32) -> u8 {
    let mv = millivolts.max(MIN_VBAT_MV);
    let level = (mv - MIN_VBAT_MV) / ((MAX_VBAT_MV - MIN_VBAT_MV) / 100);
    level.min(100) as u8
}
