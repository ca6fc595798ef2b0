//! Cell-value field files in the OpenFOAM ascii layout. Only the
//! `internalField` entry is interpreted; everything else in a file is kept
//! as text.

use nd::{ArrayView, Ix1};

use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FieldError {
  #[error("no internalField entry")]
  NoInternalField,
  #[error("internalField: {0}")]
  Syntax(String),
  #[error("internalField has {found} values, expected {expected}")]
  Length { expected: usize, found: usize },
}

const HEADER: &str = "FoamFile\n{\n    version     2.0;\n    format      ascii;\n    class       volScalarField;\n";

/// Name of the time directory for `time`. Rounded so accumulated float
/// error in `start + k * dt` doesn't leak into directory names.
pub fn time_name(time: f64) -> String {
  let t = (time * 1e9).round() / 1e9;
  if t == 0.0 {
    "0".into()
  } else {
    format!("{}", t)
  }
}

fn internal_field(values: ArrayView<f64, Ix1>) -> String {
  let mut s = String::with_capacity(values.len() * 12 + 64);
  // fmt::Write on String can't fail
  let _ = writeln!(s, "internalField   nonuniform List<scalar>");
  let _ = writeln!(s, "{}", values.len());
  s.push_str("(\n");
  for v in values.iter() {
    let _ = writeln!(s, "{:?}", v);
  }
  s.push_str(")\n;");
  s
}

/// Byte range of the `internalField ... ;` entry, `;` included.
fn internal_field_span(text: &str) -> Result<(usize, usize), FieldError> {
  let start = find_keyword(text, "internalField")
    .ok_or(FieldError::NoInternalField)?;
  let mut depth = 0i32;
  for (offset, c) in text[start..].char_indices() {
    match c {
      '(' => depth += 1,
      ')' => depth -= 1,
      ';' if depth == 0 => return Ok((start, start + offset + 1)),
      _ => {},
    }
  }
  Err(FieldError::Syntax("unterminated entry".into()))
}

/// `keyword` at the start of a line.
fn find_keyword(text: &str, keyword: &str) -> Option<usize> {
  let mut from = 0;
  while let Some(pos) = text[from..].find(keyword) {
    let at = from + pos;
    let line_start = text[..at].rfind('\n').map(|p| p + 1 ).unwrap_or(0);
    if text[line_start..at].trim().is_empty() {
      return Some(at);
    }
    from = at + keyword.len();
  }
  None
}

/// A complete field file for `name` with `values` as its internal field.
/// With a `template` (the case's own field file) only the internalField
/// entry is replaced, so its boundaryField and dimensions survive.
pub fn render_field(name: &str, values: ArrayView<f64, Ix1>,
                    template: Option<&str>) -> Result<String, FieldError> {
  let internal = internal_field(values);
  match template {
    Some(text) => {
      let (start, end) = internal_field_span(text)?;
      let mut out = String::with_capacity(text.len() + internal.len());
      out.push_str(&text[..start]);
      out.push_str(&internal);
      out.push_str(&text[end..]);
      Ok(out)
    },
    None => {
      let mut out = String::from(HEADER);
      let _ = writeln!(out, "    object      {};\n}}\n", name);
      out.push_str("dimensions      [0 0 0 0 0 0 0];\n\n");
      out.push_str(&internal);
      out.push_str("\n\nboundaryField\n{\n}\n");
      Ok(out)
    },
  }
}

/// The internal field of `text`, which must hold `expected` cells. A
/// `uniform` field is expanded.
pub fn parse_field(text: &str, expected: usize) -> Result<Vec<f64>, FieldError> {
  let (start, end) = internal_field_span(text)?;
  let entry = &text[start + "internalField".len()..end - 1];

  let mut tokens = entry
    .split(|c: char| c.is_whitespace() || c == '(' || c == ')' )
    .filter(|t| !t.is_empty() );

  let number = |t: Option<&str>| -> Result<f64, FieldError> {
    let t = t.ok_or_else(|| FieldError::Syntax("missing value".into()) )?;
    t.parse::<f64>()
      .map_err(|_| FieldError::Syntax(format!("`{}` is not a number", t)) )
  };

  match tokens.next() {
    Some("uniform") => {
      let v = number(tokens.next())?;
      Ok(vec![v; expected])
    },
    Some("nonuniform") => {
      match tokens.next() {
        Some("List<scalar>") => {},
        other => {
          return Err(FieldError::Syntax(format!("expected List<scalar>, found {:?}",
                                                other)));
        },
      }
      let count = tokens.next()
        .and_then(|t| t.parse::<usize>().ok() )
        .ok_or_else(|| FieldError::Syntax("missing list length".into()) )?;
      if count != expected {
        return Err(FieldError::Length { expected, found: count, });
      }

      let values = tokens
        .map(|t| number(Some(t)) )
        .collect::<Result<Vec<f64>, _>>()?;
      if values.len() != count {
        return Err(FieldError::Length { expected, found: values.len(), });
      }
      if values.iter().any(|v| !v.is_finite() ) {
        return Err(FieldError::Syntax("non-finite value".into()));
      }
      Ok(values)
    },
    other => Err(FieldError::Syntax(format!("unexpected {:?}", other))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use nd::arr1;

  const CASE_FIELD: &str = "FoamFile
{
    version     2.0;
    format      ascii;
    class       volScalarField;
    object      T;
}

dimensions      [0 0 0 1 0 0 0];

internalField   uniform 300;

boundaryField
{
    left
    {
        type            fixedValue;
        value           uniform 300;
    }
    right
    {
        type            zeroGradient;
    }
}
";

  #[test]
  fn written_fields_read_back() {
    let values = arr1(&[300.0, 301.25, 0.1 + 0.2, -4.0e-7]);
    let text = render_field("T", values.view(), None).unwrap();
    assert!(text.contains("object      T;"));
    assert_eq!(parse_field(&text, 4).unwrap(), values.to_vec());
  }

  #[test]
  fn template_keeps_boundary_field() {
    let values = arr1(&[1.0, 2.0, 3.0]);
    let text = render_field("T", values.view(), Some(CASE_FIELD)).unwrap();
    assert!(text.contains("dimensions      [0 0 0 1 0 0 0];"));
    assert!(text.contains("type            zeroGradient;"));
    assert!(text.contains("value           uniform 300;"));
    assert!(!text.contains("internalField   uniform 300;"));
    assert_eq!(parse_field(&text, 3).unwrap(), vec![1.0, 2.0, 3.0]);
  }

  #[test]
  fn uniform_fields_expand() {
    assert_eq!(parse_field(CASE_FIELD, 3).unwrap(), vec![300.0; 3]);
  }

  #[test]
  fn malformed_fields_are_rejected() {
    assert_eq!(parse_field("boundaryField {}", 2),
               Err(FieldError::NoInternalField));

    let short = "internalField nonuniform List<scalar> 3 ( 1 2 );";
    assert_eq!(parse_field(short, 3),
               Err(FieldError::Length { expected: 3, found: 2 }));

    let wrong = "internalField nonuniform List<scalar> 2 ( 1 2 );";
    assert_eq!(parse_field(wrong, 5),
               Err(FieldError::Length { expected: 5, found: 2 }));

    let garbage = "internalField nonuniform List<scalar> 2 ( 1 nan? );";
    assert!(matches!(parse_field(garbage, 2), Err(FieldError::Syntax(_))));

    let open = "internalField nonuniform List<scalar> 2 ( 1 2";
    assert!(matches!(parse_field(open, 2), Err(FieldError::Syntax(_))));
  }

  #[test]
  fn time_names() {
    assert_eq!(time_name(0.0), "0");
    assert_eq!(time_name(1.0), "1");
    assert_eq!(time_name(0.1 + 0.2), "0.3");
    assert_eq!(time_name(2.5), "2.5");
  }
}
