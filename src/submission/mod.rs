//! Attendance submissions: the payload posted to the webhook and the form
//! checks that guard it.

mod form;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use form::{is_valid_hhmm, is_valid_iso_date, iso_to_ddmmyyyy, now_hhmm, today_iso};

/// Check-in or check-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tipo {
  Entrada,
  Salida,
}

impl Tipo {
  pub fn as_str(&self) -> &'static str {
    match self {
      Tipo::Entrada => "ENTRADA",
      Tipo::Salida => "SALIDA",
    }
  }
}

impl fmt::Display for Tipo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Tipo {
  type Err = FormError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "ENTRADA" => Ok(Tipo::Entrada),
      "SALIDA" => Ok(Tipo::Salida),
      _ => Err(FormError::InvalidFields(vec![Field::Tipo])),
    }
  }
}

/// Form field names, as reported by validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
  Tipo,
  Fecha,
  Hora,
}

impl fmt::Display for Field {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Field::Tipo => "tipo",
      Field::Fecha => "fecha",
      Field::Hora => "hora",
    })
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FormError {
  #[error("Invalid fields: {}", join_fields(.0))]
  InvalidFields(Vec<Field>),
}

fn join_fields(fields: &[Field]) -> String {
  fields
    .iter()
    .map(Field::to_string)
    .collect::<Vec<_>>()
    .join(", ")
}

/// JSON payload accepted by the webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
  pub tipo: Tipo,
  /// `DD/MM/YYYY`
  pub fecha: String,
  /// `YYYY-MM-DD`
  pub fecha_iso: String,
  /// `HH:MM`, 24h
  pub hora: String,
}

impl Submission {
  /// Validate raw form input and build the payload. Every invalid field is
  /// reported, not just the first.
  pub fn from_form(tipo: &str, fecha_iso: &str, hora: &str) -> Result<Self, FormError> {
    let tipo = tipo.parse::<Tipo>().ok();

    let mut invalid = Vec::new();
    if tipo.is_none() {
      invalid.push(Field::Tipo);
    }
    if !is_valid_iso_date(fecha_iso) {
      invalid.push(Field::Fecha);
    }
    if !is_valid_hhmm(hora) {
      invalid.push(Field::Hora);
    }

    match tipo {
      Some(tipo) if invalid.is_empty() => Ok(Self {
        tipo,
        fecha: iso_to_ddmmyyyy(fecha_iso),
        fecha_iso: fecha_iso.to_string(),
        hora: hora.to_string(),
      }),
      _ => Err(FormError::InvalidFields(invalid)),
    }
  }

  /// Submission stamped with the current local date and time.
  pub fn now(tipo: Tipo) -> Self {
    let fecha_iso = today_iso();
    Self {
      tipo,
      fecha: iso_to_ddmmyyyy(&fecha_iso),
      fecha_iso,
      hora: now_hhmm(),
    }
  }
}

/// What happened to a page-initiated submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
  /// The webhook accepted it
  Delivered { status: u16 },
  /// Not delivered yet; stored in the deferred sync queue under this id
  Queued { id: i64 },
  /// The webhook answered with a non-2xx status
  Rejected { status: u16, body: String },
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_from_form_builds_payload() {
    let submission = Submission::from_form("ENTRADA", "2025-08-31", "09:05").unwrap();
    assert_eq!(submission.fecha, "31/08/2025");

    let json = serde_json::to_value(&submission).unwrap();
    assert_eq!(
      json,
      serde_json::json!({
        "tipo": "ENTRADA",
        "fecha": "31/08/2025",
        "fecha_iso": "2025-08-31",
        "hora": "09:05"
      })
    );
  }

  #[test]
  fn test_from_form_reports_every_invalid_field() {
    let err = Submission::from_form("PAUSA", "2025-8-31", "9:5").unwrap_err();
    assert_eq!(
      err,
      FormError::InvalidFields(vec![Field::Tipo, Field::Fecha, Field::Hora])
    );
    assert_eq!(err.to_string(), "Invalid fields: tipo, fecha, hora");
  }

  #[test]
  fn test_from_form_single_invalid_field() {
    let err = Submission::from_form("SALIDA", "2025-08-31", "25").unwrap_err();
    assert_eq!(err, FormError::InvalidFields(vec![Field::Hora]));
  }

  #[test]
  fn test_now_is_valid() {
    let submission = Submission::now(Tipo::Salida);
    assert!(Submission::from_form("SALIDA", &submission.fecha_iso, &submission.hora).is_ok());
  }
}
