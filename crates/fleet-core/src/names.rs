//! Name tokens: validation, `base*n` sibling expansion and
//! `<image>.<ranges>` container-target parsing.

use fleet_common::{FleetError, Result};

use crate::ids::IdRange;

/// Image names are `[A-Za-z0-9_]+`.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(FleetError::FormatError("image name is empty".to_string()));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(FleetError::FormatError(format!(
            "'{name}': only letters, digits and underscores are allowed"
        )));
    }
    Ok(())
}

/// Expand a creation token into concrete image names.
///
/// `base*n` yields `base_0 .. base_{n-1}`; a plain name yields itself.
/// `base*1` collapses to just `base` and `base*0` yields nothing.
pub fn expand_name(token: &str) -> Result<Vec<String>> {
    if token
        .chars()
        .any(|c| !c.is_ascii_alphanumeric() && c != '_' && c != '*')
    {
        return Err(FleetError::FormatError(format!(
            "'{token}': only letters, digits and underscores are allowed"
        )));
    }
    match token.matches('*').count() {
        0 => {
            validate_name(token)?;
            Ok(vec![token.to_string()])
        }
        1 => {
            let (base, count) = token
                .split_once('*')
                .ok_or_else(|| FleetError::FormatError(token.to_string()))?;
            validate_name(base)?;
            let count: u32 = count.parse().map_err(|_| {
                FleetError::FormatError(format!(
                    "'{token}': the part after '*' must be a number"
                ))
            })?;
            match count {
                0 => Ok(Vec::new()),
                1 => Ok(vec![base.to_string()]),
                _ => Ok((0..count).map(|i| format!("{base}_{i}")).collect()),
            }
        }
        _ => Err(FleetError::FormatError(format!(
            "'{token}': at most one '*' is allowed"
        ))),
    }
}

/// Parse a container target token `<image>.<r1,r2,...>` where each atom is
/// `N` or `N-M`. The id pairs are returned unvalidated; range validation
/// (positivity, ordering) is the identifier allocator's job.
pub fn parse_target(token: &str) -> Result<(String, Vec<IdRange>)> {
    let Some((image, ranges)) = token.split_once('.') else {
        return Err(FleetError::FormatError(format!(
            "'{token}': expected <image>.<ranges>"
        )));
    };
    if ranges.contains('.') {
        return Err(FleetError::FormatError(format!(
            "'{token}': expected exactly one '.'"
        )));
    }
    validate_name(image)?;
    Ok((image.to_string(), parse_ranges(ranges)?))
}

/// Parse a bare comma-separated range list of `N` or `N-M` atoms.
pub fn parse_ranges(token: &str) -> Result<Vec<IdRange>> {
    let mut pairs = Vec::new();
    for atom in token.split(',') {
        let pair = match atom.split_once('-') {
            Some((start, end)) => {
                let start = parse_id(token, start)?;
                let end = parse_id(token, end)?;
                (start, end)
            }
            None => {
                let id = parse_id(token, atom)?;
                (id, id)
            }
        };
        pairs.push(pair);
    }
    Ok(pairs)
}

fn parse_id(token: &str, part: &str) -> Result<u32> {
    part.parse()
        .map_err(|_| FleetError::FormatError(format!("'{token}': '{part}' is not a number")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_expansion_yields_suffixed_siblings() {
        assert_eq!(expand_name("pwn*2").unwrap(), vec!["pwn_0", "pwn_1"]);
        assert_eq!(expand_name("pwn*1").unwrap(), vec!["pwn"]);
        assert_eq!(expand_name("pwn").unwrap(), vec!["pwn"]);
        assert!(expand_name("pwn*0").unwrap().is_empty());
    }

    #[test]
    fn bad_expansion_tokens_rejected() {
        assert!(expand_name("pwn*2*3").is_err());
        assert!(expand_name("pwn*x").is_err());
        assert!(expand_name("pw-n*2").is_err());
        assert!(expand_name("*2").is_err());
    }

    #[test]
    fn target_parsing() {
        let (image, ranges) = parse_target("foo.1,4-5,6-12").unwrap();
        assert_eq!(image, "foo");
        assert_eq!(ranges, vec![(1, 1), (4, 5), (6, 12)]);
    }

    #[test]
    fn bare_range_lists_parse() {
        assert_eq!(parse_ranges("1").unwrap(), vec![(1, 1)]);
        assert_eq!(parse_ranges("1-3,7").unwrap(), vec![(1, 3), (7, 7)]);
        assert!(parse_ranges("a-2").is_err());
        assert!(parse_ranges("").is_err());
    }

    #[test]
    fn target_parsing_rejects_malformed_tokens() {
        assert!(parse_target("foo").is_err());
        assert!(parse_target("foo.1.2").is_err());
        assert!(parse_target("foo.a-2").is_err());
        assert!(parse_target("foo.").is_err());
        assert!(parse_target(".1-2").is_err());
    }

    #[test]
    fn zero_ranges_parse_but_fail_validation_later() {
        // `foo.0-5` is shaped correctly; the allocator rejects it wholesale.
        let (_, ranges) = parse_target("foo.0-5").unwrap();
        assert!(crate::ids::validate_ranges(&ranges).is_err());
    }
}
