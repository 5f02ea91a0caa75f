//! Mode catalog: config checks and validator construction per mode key

use super::choose_winner::ChooseWinner;
use super::either_or::EitherOr;
use super::next_score::NextScore;
use super::prop_hunt::PropHunt;
use super::rules::ModeRules;
use super::runtime::{ModeValidator, Validator, ValidatorDeps};
use super::spread::Spread;
use super::total_points::TotalPoints;
use crate::domain::ModeKey;
use crate::error::{Result, WagerError};
use std::collections::BTreeSet;
use std::sync::Arc;

fn choices_with<R: ModeRules>(rules: &R, raw: &serde_json::Value) -> Result<Vec<String>> {
    let config = rules.parse_config(raw)?;
    Ok(rules.choices(&config))
}

/// Host-settled propositions declare their own choices
fn manual_choices(raw: &serde_json::Value) -> Result<Vec<String>> {
    let invalid = |reason: &str| WagerError::InvalidModeConfig {
        mode: ModeKey::U2Pick.to_string(),
        reason: reason.to_string(),
    };
    let choices: Vec<String> = raw
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| invalid("choices must be an array of strings"))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(|s| s.trim().to_string())
                .ok_or_else(|| invalid("choices must be an array of strings"))
        })
        .collect::<Result<_>>()?;

    if choices.iter().any(|c| c.is_empty()) {
        return Err(invalid("choices must not be empty strings"));
    }
    let distinct: BTreeSet<String> = choices.iter().map(|c| c.to_ascii_lowercase()).collect();
    if distinct.len() < 2 || distinct.len() != choices.len() {
        return Err(invalid("at least two distinct choices are required"));
    }
    Ok(choices)
}

/// Validate a mode config and return the choices members may guess
pub fn choices_for(mode: ModeKey, raw: &serde_json::Value) -> Result<Vec<String>> {
    use ModeKey::*;

    match mode {
        NflNextScore => choices_with(&NextScore, raw),
        NflEitherOr | NbaEitherOr => choices_with(&EitherOr::new(mode), raw),
        NflTotalPoints | NbaTotalPoints => choices_with(&TotalPoints::new(mode), raw),
        NflSpread | NbaSpread => choices_with(&Spread::new(mode), raw),
        NflPropHunt | NbaPropHunt => choices_with(&PropHunt::new(mode), raw),
        NflChooseWinner | NbaChooseWinner => choices_with(&ChooseWinner::new(mode), raw),
        U2Pick => manual_choices(raw),
    }
}

/// Validator for a mode; manual modes have none
pub fn validator_for(mode: ModeKey, deps: ValidatorDeps) -> Option<Arc<dyn Validator>> {
    use ModeKey::*;

    let validator: Arc<dyn Validator> = match mode {
        NflNextScore => Arc::new(ModeValidator::new(NextScore, deps)),
        NflEitherOr | NbaEitherOr => Arc::new(ModeValidator::new(EitherOr::new(mode), deps)),
        NflTotalPoints | NbaTotalPoints => {
            Arc::new(ModeValidator::new(TotalPoints::new(mode), deps))
        }
        NflSpread | NbaSpread => Arc::new(ModeValidator::new(Spread::new(mode), deps)),
        NflPropHunt | NbaPropHunt => Arc::new(ModeValidator::new(PropHunt::new(mode), deps)),
        NflChooseWinner | NbaChooseWinner => {
            Arc::new(ModeValidator::new(ChooseWinner::new(mode), deps))
        }
        U2Pick => return None,
    };
    Some(validator)
}
