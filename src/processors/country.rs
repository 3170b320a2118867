//! ## Country to Continent
//!
//! [`CountryProcessor`] replaces the ISO-3166 alpha-2 country code of a transaction with the code
//! of its continent (`AF`, `AN`, `AS`, `EU`, `NA`, `OC`, `SA`), after imputing missing countries
//! with the most frequent one.
//!
//! Where that most frequent country comes from is configurable through [`CountryImputation`]:
//! computed from the data handed to `transform` (the historical behavior, which degenerates to
//! "no imputation" on a single serving row) or frozen at `fit` from the training data.

use crate::dataset::{string_values, Target};
use crate::exceptions::{PipelineError, PipelineResult};
use crate::impl_processor;
use crate::processors::{columns_except, validate_columns};
pub use crate::settings::CountryImputation;
use datafusion::arrow::datatypes::DataType;
use datafusion::functions_aggregate::expr_fn::count;
use datafusion::logical_expr::{cast, ident, in_list, lit, Case as DFCase, Expr};
use datafusion::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const AFRICA: &[&str] = &[
    "AO", "BF", "BI", "BJ", "BW", "CD", "CF", "CG", "CI", "CM", "CV", "DJ", "DZ", "EG", "EH", "ER",
    "ET", "GA", "GH", "GM", "GN", "GQ", "GW", "KE", "KM", "LR", "LS", "LY", "MA", "MG", "ML", "MR",
    "MU", "MW", "MZ", "NA", "NE", "NG", "RE", "RW", "SC", "SD", "SH", "SL", "SN", "SO", "SS", "ST",
    "SZ", "TD", "TG", "TN", "TZ", "UG", "YT", "ZA", "ZM", "ZW",
];

const ANTARCTICA: &[&str] = &["AQ", "BV", "GS", "HM", "TF"];

const ASIA: &[&str] = &[
    "AE", "AF", "AM", "AZ", "BD", "BH", "BN", "BT", "CC", "CN", "CX", "CY", "GE", "HK", "ID", "IL",
    "IN", "IO", "IQ", "IR", "JO", "JP", "KG", "KH", "KP", "KR", "KW", "KZ", "LA", "LB", "LK", "MM",
    "MN", "MO", "MV", "MY", "NP", "OM", "PH", "PK", "PS", "QA", "SA", "SG", "SY", "TH", "TJ", "TM",
    "TR", "TW", "UZ", "VN", "YE",
];

const EUROPE: &[&str] = &[
    "AD", "AL", "AT", "AX", "BA", "BE", "BG", "BY", "CH", "CZ", "DE", "DK", "EE", "ES", "FI", "FO",
    "FR", "GB", "GG", "GI", "GR", "HR", "HU", "IE", "IM", "IS", "IT", "JE", "LI", "LT", "LU", "LV",
    "MC", "MD", "ME", "MK", "MT", "NL", "NO", "PL", "PT", "RO", "RS", "RU", "SE", "SI", "SJ", "SK",
    "SM", "UA", "VA", "XK",
];

const NORTH_AMERICA: &[&str] = &[
    "AG", "AI", "AW", "BB", "BL", "BM", "BQ", "BS", "BZ", "CA", "CR", "CU", "CW", "DM", "DO", "GD",
    "GL", "GP", "GT", "HN", "HT", "JM", "KN", "KY", "LC", "MF", "MQ", "MS", "MX", "NI", "PA", "PM",
    "PR", "SV", "SX", "TC", "TT", "US", "VC", "VG", "VI",
];

const OCEANIA: &[&str] = &[
    "AS", "AU", "CK", "FJ", "FM", "GU", "KI", "MH", "MP", "NC", "NF", "NR", "NU", "NZ", "PF", "PG",
    "PN", "PW", "SB", "TK", "TO", "TV", "UM", "VU", "WF", "WS",
];

const SOUTH_AMERICA: &[&str] = &[
    "AR", "BO", "BR", "CL", "CO", "EC", "FK", "GF", "GY", "PE", "PY", "SR", "UY", "VE",
];

/// Continent code and member countries.
const CONTINENTS: [(&str, &[&str]); 7] = [
    ("AF", AFRICA),
    ("AN", ANTARCTICA),
    ("AS", ASIA),
    ("EU", EUROPE),
    ("NA", NORTH_AMERICA),
    ("OC", OCEANIA),
    ("SA", SOUTH_AMERICA),
];

/// Continent code of an alpha-2 country code, if the code is known.
pub fn continent_of(country: &str) -> Option<&'static str> {
    CONTINENTS
        .iter()
        .find(|(_, members)| members.contains(&country))
        .map(|(continent, _)| *continent)
}

/// Most frequent non-missing value of a text column; ties go to the lowest value.
async fn text_mode(df: &DataFrame, col_name: &str) -> PipelineResult<Option<String>> {
    let grouped = df
        .clone()
        .select(vec![cast(ident(col_name), DataType::Utf8).alias(col_name)])?
        .filter(ident(col_name).is_not_null())?
        .aggregate(vec![ident(col_name)], vec![count(lit(1)).alias("cnt")])?
        .sort(vec![
            ident("cnt").sort(false, false),
            ident(col_name).sort(true, false),
        ])?
        .limit(0, Some(1))?;
    for batch in grouped.collect().await? {
        if batch.num_rows() > 0 {
            return Ok(string_values(batch.column(0))?.into_iter().next().flatten());
        }
    }
    Ok(None)
}

/// State frozen at fit time in [`CountryImputation::FitTime`] mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryState {
    /// `None` when the training data had no country at all.
    pub mode: Option<String>,
}

/// Maps the country column to a continent column, imputing missing countries with the mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryProcessor {
    pub country_column: String,
    pub continent_column: String,
    pub imputation: CountryImputation,
    /// Continent assigned to unmapped or still-missing countries.
    pub unknown_continent: String,
    pub state: Option<CountryState>,
}

impl CountryProcessor {
    pub fn new(country_column: impl Into<String>, continent_column: impl Into<String>) -> Self {
        Self {
            country_column: country_column.into(),
            continent_column: continent_column.into(),
            imputation: CountryImputation::CallTime,
            unknown_continent: "unknown".to_string(),
            state: None,
        }
    }

    pub fn with_imputation(mut self, imputation: CountryImputation) -> Self {
        self.imputation = imputation;
        self
    }

    pub fn with_unknown_continent(mut self, unknown: impl Into<String>) -> Self {
        self.unknown_continent = unknown.into();
        self
    }

    pub async fn fit(&mut self, df: &DataFrame, _target: Option<&Target>) -> PipelineResult<()> {
        validate_columns(df, &[self.country_column.clone()])?;
        self.warn_unmapped(df).await?;
        if self.imputation == CountryImputation::FitTime {
            let mode = text_mode(df, &self.country_column).await?;
            debug!("Frozen country mode: {:?}", mode);
            self.state = Some(CountryState { mode });
        }
        Ok(())
    }

    async fn warn_unmapped(&self, df: &DataFrame) -> PipelineResult<()> {
        let distinct = df
            .clone()
            .select(vec![cast(ident(&self.country_column), DataType::Utf8)])?
            .distinct()?;
        let mut unmapped = Vec::new();
        for batch in distinct.collect().await? {
            for code in string_values(batch.column(0))?.into_iter().flatten() {
                if continent_of(&code).is_none() {
                    unmapped.push(code);
                }
            }
        }
        if !unmapped.is_empty() {
            unmapped.sort();
            warn!(
                "Country codes without a continent, mapped to '{}': {:?}",
                self.unknown_continent, unmapped
            );
        }
        Ok(())
    }

    fn continent_expr(&self, country: Expr) -> Expr {
        let when_then_expr = CONTINENTS
            .iter()
            .map(|(continent, members)| {
                let codes: Vec<Expr> = members.iter().map(|code| lit(*code)).collect();
                (
                    Box::new(in_list(country.clone(), codes, false)),
                    Box::new(lit(*continent)),
                )
            })
            .collect();
        Expr::Case(DFCase {
            expr: None,
            when_then_expr,
            else_expr: Some(Box::new(lit(self.unknown_continent.clone()))),
        })
    }

    pub async fn transform(&self, df: DataFrame) -> PipelineResult<DataFrame> {
        validate_columns(&df, &[self.country_column.clone()])?;
        let mode = match self.imputation {
            CountryImputation::CallTime => text_mode(&df, &self.country_column).await?,
            CountryImputation::FitTime => self
                .state
                .as_ref()
                .ok_or_else(|| PipelineError::NotFitted("CountryProcessor".to_string()))?
                .mode
                .clone(),
        };

        let raw = cast(ident(&self.country_column), DataType::Utf8);
        let country = match mode {
            Some(mode) => Expr::Case(DFCase {
                expr: None,
                when_then_expr: vec![(Box::new(raw.clone().is_null()), Box::new(lit(mode)))],
                else_expr: Some(Box::new(raw)),
            }),
            None => raw,
        };

        let mut exprs = columns_except(&df, &[self.country_column.clone()]);
        exprs.push(self.continent_expr(country).alias(&self.continent_column));
        df.select(exprs).map_err(PipelineError::from)
    }

    fn inherent_is_stateful(&self) -> bool {
        self.imputation == CountryImputation::FitTime
    }
}

impl_processor!(CountryProcessor);
