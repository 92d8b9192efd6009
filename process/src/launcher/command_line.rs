//! Windows command line assembly.
//!
//! An argument containing a space or a double quote is wrapped in double
//! quotes with embedded quotes doubled; an empty argument becomes `""`.
//! Anything else is passed through untouched. Operates on UTF-16 code units
//! so it can be exercised on every platform.
#![cfg_attr(not(windows), allow(dead_code))]

const SPACE: u16 = b' ' as u16;
const QUOTE: u16 = b'"' as u16;

fn needs_quotes(arg: &[u16]) -> bool {
    arg.is_empty() || arg.iter().any(|&unit| unit == SPACE || unit == QUOTE)
}

pub(crate) fn push_argument(line: &mut Vec<u16>, arg: &[u16]) {
    if !needs_quotes(arg) {
        line.extend_from_slice(arg);
        return;
    }
    line.push(QUOTE);
    for &unit in arg {
        if unit == QUOTE {
            line.push(QUOTE);
        }
        line.push(unit);
    }
    line.push(QUOTE);
}

/// Join the executable and its arguments into a NUL-terminated command line.
pub(crate) fn build<I>(args: I) -> Vec<u16>
where
    I: IntoIterator,
    I::Item: AsRef<[u16]>,
{
    let mut line = Vec::new();
    for (index, arg) in args.into_iter().enumerate() {
        if index > 0 {
            line.push(SPACE);
        }
        push_argument(&mut line, arg.as_ref());
    }
    line.push(0);
    line
}
