//! nom grammar for the rule DSL.

use nom::branch::alt;
use nom::bytes::complete::{is_not, take_until};
use nom::character::complete::char;
use nom::combinator::rest;
use nom::IResult;

use super::{Action, ConfigError, MethodSignature, ModifyConfig};

/// Parse one rule string. Malformed rules fail fast with the offending
/// string embedded verbatim; a bad rule must never degrade into a silent
/// no-op.
pub fn parse_rule(rule: &str) -> Result<ModifyConfig, ConfigError> {
    let input = rule.trim();
    let (action_input, target_input) = split_on_arrow(input);

    let target_method = parse_signature(rule, target_input, None)?;

    let action = match action_input {
        None | Some("") => Action::EmptyBody,
        Some(action_str) => parse_action(rule, action_str)?,
    };

    Ok(ModifyConfig {
        target_method,
        action,
    })
}

/// Split `target=>action` into its halves; `None` when there is no `=>`.
fn split_on_arrow(input: &str) -> (Option<&str>, &str) {
    match take_until::<_, _, nom::error::Error<&str>>("=>")(input) {
        Ok((remaining, target)) => (Some(&remaining[2..]), target),
        Err(_) => (None, input),
    }
}

fn parse_action(rule: &str, input: &str) -> Result<Action, ConfigError> {
    let lowered = input.to_ascii_lowercase();
    match lowered.as_str() {
        "trycatch" | "trycatchbody" => return Ok(Action::TryCatchBody),
        "trace" | "tracebody" => return Ok(Action::TraceBody),
        "empty" | "emptybody" => return Ok(Action::EmptyBody),
        _ => {}
    }

    if let Ok((to_class, target_input)) =
        take_until::<_, _, nom::error::Error<&str>>("->")(input)
    {
        let to_class = &to_class[2..];
        if to_class.is_empty() {
            return Err(bad_rule(rule, "missing redirect class after \"->\""));
        }
        let target = parse_signature(rule, target_input, Some("->"))?;
        return Ok(Action::ChangeInvoke {
            target,
            to_class: to_class.replace('.', "/"),
        });
    }

    if input.contains('#') {
        return Ok(Action::RemoveInvoke(parse_signature(rule, input, None)?));
    }

    Err(bad_rule(rule, "unrecognized action"))
}

/// `class#method#descriptor`. The descriptor runs to the end of the input
/// (or to `stop`, for the inner signature of a redirect).
fn parse_signature(
    rule: &str,
    input: &str,
    stop: Option<&'static str>,
) -> Result<MethodSignature, ConfigError> {
    match signature_parser(input, stop) {
        Ok(("", signature)) => Ok(signature),
        _ => Err(bad_rule(
            rule,
            "expected three #-separated fields (class#method#descriptor)",
        )),
    }
}

fn signature_parser<'a>(
    input: &'a str,
    stop: Option<&'static str>,
) -> IResult<&'a str, MethodSignature> {
    let (input, class) = is_not("#")(input)?;
    let (input, _) = char('#')(input)?;
    let (input, method) = is_not("#")(input)?;
    let (input, _) = char('#')(input)?;
    let (input, descriptor) = match stop {
        Some(stop) => alt((take_until(stop), rest))(input)?,
        None => rest(input)?,
    };
    if descriptor.is_empty() {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::NonEmpty,
        )));
    }
    Ok((input, MethodSignature::new(class, method, descriptor)))
}

fn bad_rule(rule: &str, reason: &str) -> ConfigError {
    ConfigError::BadRule {
        rule: rule.to_string(),
        reason: reason.to_string(),
    }
}
