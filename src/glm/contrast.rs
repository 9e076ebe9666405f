//! Contrasts over named design columns and their statistics.
//!
//! A contrast is written as a linear expression of column names:
//!
//! ```text
//! audio - visual
//! 0.5 * speech + 0.5 * `non-speech` - silence
//! audio; visual              (two rows: an F contrast)
//! [1, 0, -1, 0, 0]           (explicit weights, one per column)
//! ```
//!
//! Names resolve against the per-column identity basis of each run's design,
//! so the same expression applies to runs whose designs differ in drift or
//! confound columns.

use logos::Logos;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::design::{ColumnKind, DesignMatrix};
use crate::domain::{ContrastSpec, OutputType};
use crate::error::AppError;
use crate::glm::model::{FittedModel, RunFit};
use crate::math::{f_sf, pseudo_inverse, t_sf, z_from_p};

/// Lower bound on a t contrast variance.
const MIN_VARIANCE: f64 = 1e-50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContrastKind {
    T,
    F,
}

/// One identity row per design column, keyed by the column name.
pub fn basis_contrasts(design: &DesignMatrix) -> Vec<(String, DVector<f64>)> {
    let p = design.n_columns();
    design
        .names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let mut row = DVector::zeros(p);
            row[i] = 1.0;
            (name.clone(), row)
        })
        .collect()
}

/// One contrast per main condition regressor.
pub fn default_contrasts(design: &DesignMatrix) -> Vec<ContrastSpec> {
    basis_contrasts(design)
        .into_iter()
        .zip(&design.kinds)
        .filter(|(_, kind)| **kind == ColumnKind::Condition)
        .map(|((name, _), _)| ContrastSpec {
            expr: quote_identifier(&name),
            id: name,
        })
        .collect()
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Column name as it must be written in an expression.
pub fn quote_identifier(name: &str) -> String {
    if is_identifier(name) { name.to_string() } else { format!("`{name}`") }
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum Token {
    #[regex(r"([0-9]+\.?[0-9]*|\.[0-9]+)([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Num(f64),

    #[regex(r"[A-Za-z_][A-Za-z0-9_.]*", |lex| lex.slice().to_string())]
    #[regex(r"`[^`]+`", |lex| lex.slice().trim_matches('`').to_string())]
    Ident(String),

    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("/")]
    Slash,
}

fn tokenize(row: &str) -> Result<Vec<Token>, String> {
    let mut lexer = Token::lexer(row);
    let mut tokens = Vec::new();
    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => tokens.push(token),
            Err(_) => return Err(format!("unexpected input '{}'", lexer.slice())),
        }
    }
    Ok(tokens)
}

/// Parse one `+`/`-` separated row into weights over `columns`.
fn parse_row(row: &str, columns: &[String]) -> Result<DVector<f64>, String> {
    let trimmed = row.trim();
    if let Some(inner) = trimmed.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        return parse_weights(inner, columns.len());
    }

    let tokens = tokenize(trimmed)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }

    let mut weights = DVector::zeros(columns.len());
    let mut pos = 0;
    let mut expect_term = true;
    let mut sign = 1.0;

    while pos < tokens.len() {
        if !expect_term {
            sign = match tokens[pos] {
                Token::Plus => 1.0,
                Token::Minus => -1.0,
                ref t => return Err(format!("expected '+' or '-', found {t:?}")),
            };
            pos += 1;
            expect_term = true;
            continue;
        }

        // Leading unary signs.
        while pos < tokens.len() && matches!(tokens[pos], Token::Plus | Token::Minus) {
            if tokens[pos] == Token::Minus {
                sign = -sign;
            }
            pos += 1;
        }

        let mut coef = sign;
        let mut name: Option<String> = None;
        let mut divide = false;
        loop {
            match tokens.get(pos) {
                Some(Token::Num(v)) => {
                    coef = if divide { coef / v } else { coef * v };
                }
                Some(Token::Ident(n)) => {
                    if divide {
                        return Err(format!("cannot divide by column '{n}'"));
                    }
                    if name.is_some() {
                        return Err(format!("term has more than one column name ('{n}')"));
                    }
                    name = Some(n.clone());
                }
                Some(t) => return Err(format!("expected a number or column name, found {t:?}")),
                None => return Err("expression ends with an operator".to_string()),
            }
            pos += 1;
            match tokens.get(pos) {
                Some(Token::Star) => divide = false,
                Some(Token::Slash) => divide = true,
                _ => break,
            }
            pos += 1;
        }

        let Some(name) = name else {
            return Err("term without a column name".to_string());
        };
        let Some(idx) = columns.iter().position(|c| *c == name) else {
            return Err(format!(
                "unknown column '{name}'; available columns: {}",
                columns.join(", ")
            ));
        };
        if !coef.is_finite() {
            return Err(format!("non-finite weight for '{name}'"));
        }
        weights[idx] += coef;
        expect_term = false;
        sign = 1.0;
    }

    if expect_term {
        return Err("expression ends with an operator".to_string());
    }
    Ok(weights)
}

fn parse_weights(inner: &str, p: usize) -> Result<DVector<f64>, String> {
    let values = inner
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>().map_err(|_| format!("invalid weight '{s}'")))
        .collect::<Result<Vec<f64>, String>>()?;
    if values.len() != p {
        return Err(format!("{} weights given for {p} design columns", values.len()));
    }
    Ok(DVector::from_vec(values))
}

/// Parse a contrast expression into a `q × p` weight matrix.
///
/// `q = 1` is a t contrast; more rows (separated by `;`) form an F contrast.
pub fn parse_contrast(expr: &str, columns: &[String]) -> Result<DMatrix<f64>, AppError> {
    let rows = expr
        .split(';')
        .map(|r| parse_row(r, columns))
        .collect::<Result<Vec<_>, String>>()
        .map_err(|e| AppError::input(format!("Invalid contrast '{expr}': {e}.")))?;

    for row in &rows {
        if row.iter().all(|&w| w == 0.0) {
            return Err(AppError::input(format!("Contrast '{expr}' has a null row.")));
        }
    }

    let p = columns.len();
    let mut matrix = DMatrix::zeros(rows.len(), p);
    for (i, row) in rows.iter().enumerate() {
        matrix.set_row(i, &row.transpose());
    }
    Ok(matrix)
}

/// Effect, variance and dof of a contrast at every mask voxel.
#[derive(Debug, Clone)]
pub struct ContrastEstimate {
    pub kind: ContrastKind,
    /// Number of rows.
    pub dim: usize,
    /// `dim × n_voxels`.
    pub effect: DMatrix<f64>,
    /// `dim² × n_voxels`, each column a column-major `dim × dim` covariance.
    pub variance: DMatrix<f64>,
    pub dof: Vec<f64>,
}

impl ContrastEstimate {
    pub fn n_voxels(&self) -> usize {
        self.dof.len()
    }

    /// Fixed-effects combination: effects, variances and dofs add up.
    pub fn combine(mut self, other: &ContrastEstimate) -> Result<Self, AppError> {
        if self.kind != other.kind || self.dim != other.dim || self.n_voxels() != other.n_voxels() {
            return Err(AppError::input(
                "Contrast has a different shape in each run and cannot be combined.",
            ));
        }
        self.effect += &other.effect;
        self.variance += &other.variance;
        for (a, b) in self.dof.iter_mut().zip(&other.dof) {
            *a += b;
        }
        Ok(self)
    }

    /// t or F statistic per voxel.
    pub fn stat(&self) -> Vec<f64> {
        let q = self.dim;
        (0..self.n_voxels())
            .into_par_iter()
            .map(|v| match self.kind {
                ContrastKind::T => {
                    let var = self.variance[(0, v)].max(MIN_VARIANCE);
                    self.effect[(0, v)] / var.sqrt()
                }
                ContrastKind::F => {
                    let cov = DMatrix::from_iterator(q, q, self.variance.column(v).iter().cloned());
                    let e = self.effect.column(v).into_owned();
                    match pseudo_inverse(&cov) {
                        Ok(inv) => (e.transpose() * &inv.pinv * &e)[(0, 0)] / q as f64,
                        Err(_) => 0.0,
                    }
                }
            })
            .collect()
    }

    /// Upper-tail p-value per voxel.
    pub fn p_value(&self) -> Result<Vec<f64>, AppError> {
        let stat = self.stat();
        let q = self.dim as f64;
        stat.par_iter()
            .zip(self.dof.par_iter())
            .map(|(&s, &dof)| match self.kind {
                ContrastKind::T => t_sf(s, dof),
                ContrastKind::F => f_sf(s, q, dof),
            })
            .collect()
    }

    pub fn z_score(&self) -> Result<Vec<f64>, AppError> {
        Ok(self.p_value()?.into_iter().map(z_from_p).collect())
    }

    /// Per-voxel values for the requested output type.
    pub fn output(&self, output_type: OutputType) -> Result<Vec<f64>, AppError> {
        match output_type {
            OutputType::ZScore => self.z_score(),
            OutputType::Stat => Ok(self.stat()),
            OutputType::PValue => self.p_value(),
            OutputType::EffectSize | OutputType::EffectVariance if self.kind == ContrastKind::F => Err(
                AppError::input(format!("{} is only defined for t contrasts.", output_type.display_name())),
            ),
            OutputType::EffectSize => Ok(self.effect.row(0).iter().cloned().collect()),
            OutputType::EffectVariance => Ok(self.variance.row(0).iter().cloned().collect()),
        }
    }
}

/// Contrast estimate for one run.
pub fn run_contrast(run: &RunFit, weights: &DMatrix<f64>) -> Result<ContrastEstimate, AppError> {
    let p = run.design.n_columns();
    if weights.ncols() != p {
        return Err(AppError::input(format!(
            "Contrast has {} weights but the design has {p} columns.",
            weights.ncols()
        )));
    }
    let q = weights.nrows();
    let kind = if q == 1 { ContrastKind::T } else { ContrastKind::F };
    let n_vox = run.n_voxels();

    // c C cᵀ once per noise group.
    let group_cov: Vec<DMatrix<f64>> = run
        .groups
        .iter()
        .map(|g| weights * &g.normalized_cov * weights.transpose())
        .collect();

    let effect = weights * &run.betas;
    let mut variance = DMatrix::zeros(q * q, n_vox);
    let mut dof = vec![0.0; n_vox];
    for v in 0..n_vox {
        let g = run.labels[v];
        let sigma2 = run.dispersion[v];
        for (k, c) in group_cov[g].iter().enumerate() {
            variance[(k, v)] = c * sigma2;
        }
        dof[v] = run.groups[g].df_resid;
    }

    Ok(ContrastEstimate {
        kind,
        dim: q,
        effect,
        variance,
        dof,
    })
}

impl FittedModel {
    /// Contrast estimate of `expr`, fixed-effects combined across runs.
    pub fn compute_contrast(&self, expr: &str) -> Result<ContrastEstimate, AppError> {
        let mut combined: Option<ContrastEstimate> = None;
        for run in &self.runs {
            let weights = parse_contrast(expr, &run.design.names)?;
            let est = run_contrast(run, &weights)?;
            combined = Some(match combined {
                None => est,
                Some(acc) => acc.combine(&est)?,
            });
        }
        combined.ok_or_else(|| AppError::empty("No fitted runs."))
    }
}
