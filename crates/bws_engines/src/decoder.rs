#![forbid(unsafe_code)]

//! Decoders for the two comma-separated engine output files.

use bws_contracts::gene::GenePanel;
use bws_contracts::result::{
    CancerRiskResult, CancerRiskRow, MutationProbabilityResult, Probability,
};

pub const RISK_ROW_FIELDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("engine output is empty")]
    Empty,
    #[error("line {line}: expected {expected} fields, found {got}")]
    FieldCount {
        line: usize,
        expected: usize,
        got: usize,
    },
    #[error("line {line} field {field}: '{value}' is not a valid number")]
    InvalidNumber {
        line: usize,
        field: usize,
        value: String,
    },
    #[error("line {line}: unexpected content after the probability line")]
    TrailingContent { line: usize },
}

fn split_fields(line: &str) -> Vec<&str> {
    line.split(',').map(str::trim).collect()
}

fn parse_f64(line: usize, field: usize, raw: &str) -> Result<f64, DecodeError> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| DecodeError::InvalidNumber {
            line,
            field,
            value: raw.to_string(),
        })
}

fn parse_pair(line: usize, fields: &[&str], at: usize) -> Result<Probability, DecodeError> {
    Ok(Probability {
        decimal: parse_f64(line, at + 1, fields[at])?,
        percent: parse_f64(line, at + 2, fields[at + 1])?,
    })
}

/// Decodes `no_mut_dec,no_mut_pct,(gene_dec,gene_pct)*` with one pair per
/// panel gene, in panel order. Exactly one non-blank line is accepted.
pub fn decode_mutation_probabilities(
    text: &str,
    panel: &GenePanel,
) -> Result<MutationProbabilityResult, DecodeError> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty());
    let (line_no, line) = lines.next().ok_or(DecodeError::Empty)?;
    if let Some((extra, _)) = lines.next() {
        return Err(DecodeError::TrailingContent { line: extra });
    }
    let fields = split_fields(line);
    let expected = 2 + 2 * panel.len();
    if fields.len() != expected {
        return Err(DecodeError::FieldCount {
            line: line_no,
            expected,
            got: fields.len(),
        });
    }

    let no_mutation = parse_pair(line_no, &fields, 0)?;
    let genes = panel
        .genes()
        .iter()
        .enumerate()
        .map(|(i, gene)| Ok((gene.clone(), parse_pair(line_no, &fields, 2 + 2 * i)?)))
        .collect::<Result<Vec<_>, DecodeError>>()?;
    Ok(MutationProbabilityResult { no_mutation, genes })
}

/// Decodes `age,bc_dec,bc_pct,oc_dec,oc_pct` rows, skipping blank lines and
/// keeping rows in file order.
pub fn decode_cancer_risks(text: &str) -> Result<CancerRiskResult, DecodeError> {
    let mut rows = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let line_no = i + 1;
        let fields = split_fields(line);
        if fields.len() != RISK_ROW_FIELDS {
            return Err(DecodeError::FieldCount {
                line: line_no,
                expected: RISK_ROW_FIELDS,
                got: fields.len(),
            });
        }
        let age = fields[0]
            .parse::<u16>()
            .map_err(|_| DecodeError::InvalidNumber {
                line: line_no,
                field: 1,
                value: fields[0].to_string(),
            })?;
        rows.push(CancerRiskRow {
            age,
            breast_cancer_risk: parse_pair(line_no, &fields, 1)?,
            ovarian_cancer_risk: parse_pair(line_no, &fields, 3)?,
        });
    }
    if rows.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(CancerRiskResult { rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_gene_panel() -> GenePanel {
        GenePanel::from_symbols(&["BRCA1", "BRCA2"]).unwrap()
    }

    #[test]
    fn probabilities_decode_in_panel_order() {
        let result =
            decode_mutation_probabilities("0.95,95.0,0.02,2.0,0.03,3.0", &two_gene_panel())
                .unwrap();
        assert_eq!(
            result.no_mutation,
            Probability {
                decimal: 0.95,
                percent: 95.0
            }
        );
        assert_eq!(result.genes.len(), 2);
        assert_eq!(result.genes[0].0.as_str(), "BRCA1");
        assert_eq!(
            result.gene("BRCA2"),
            Some(Probability {
                decimal: 0.03,
                percent: 3.0
            })
        );
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn probabilities_with_missing_field_fail_with_field_count() {
        let err = decode_mutation_probabilities("0.95,95.0,0.02,2.0,0.03", &two_gene_panel())
            .unwrap_err();
        assert_eq!(
            err,
            DecodeError::FieldCount {
                line: 1,
                expected: 6,
                got: 5
            }
        );
    }

    #[test]
    fn probabilities_reject_content_after_the_single_line() {
        let err = decode_mutation_probabilities(
            "0.95,95.0,0.02,2.0,0.03,3.0\nGARBAGE,x\n",
            &two_gene_panel(),
        )
        .unwrap_err();
        assert_eq!(err, DecodeError::TrailingContent { line: 2 });

        let padded = "\n0.95,95.0,0.02,2.0,0.03,3.0\n\n  \n";
        assert!(decode_mutation_probabilities(padded, &two_gene_panel()).is_ok());
    }

    #[test]
    fn probabilities_reject_non_numeric_value() {
        let err = decode_mutation_probabilities("0.95,95.0,x,2.0,0.03,3.0", &two_gene_panel())
            .unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidNumber {
                line: 1,
                field: 3,
                value: "x".to_string()
            }
        );
        assert_eq!(
            decode_mutation_probabilities("\n \n", &two_gene_panel()).unwrap_err(),
            DecodeError::Empty
        );
    }

    #[test]
    fn risks_skip_blank_lines_and_keep_order() {
        let result = decode_cancer_risks("20,0.001,0.1,0.0005,0.05\n\n30,0.002,0.2,0.001,0.1\n")
            .unwrap();
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0].age, 20);
        assert_eq!(result.rows[1].age, 30);
        assert_eq!(result.rows[1].breast_cancer_risk.percent, 0.2);
        assert_eq!(result.rows[0].ovarian_cancer_risk.decimal, 0.0005);
    }

    #[test]
    fn risks_do_not_resort_rows() {
        let result = decode_cancer_risks("40,0.1,10,0.1,10\n30,0.1,10,0.1,10\n").unwrap();
        let ages: Vec<u16> = result.rows.iter().map(|r| r.age).collect();
        assert_eq!(ages, vec![40, 30]);
    }

    #[test]
    fn risks_reject_non_numeric_age() {
        let err = decode_cancer_risks("20,0.001,0.1,0.0005,0.05\nabc,0.002,0.2,0.001,0.1\n")
            .unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidNumber {
                line: 2,
                field: 1,
                value: "abc".to_string()
            }
        );
    }

    #[test]
    fn risks_reject_short_rows_instead_of_dropping_them() {
        let err = decode_cancer_risks("20,0.001,0.1,0.0005\n").unwrap_err();
        assert!(matches!(err, DecodeError::FieldCount { got: 4, .. }));
    }
}
