//! Chi-square homogeneity tests over per-position nucleotide counts and
//! Benjamini–Hochberg correction.

use log::warn;

pub const NUCLEOTIDES: [u8; 4] = *b"ACGT";

/// Outcome of one contingency test. A degenerate table has no statistic and
/// a p-value of 1 so corrected series keep their full length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChiSquareTest {
    pub statistic: Option<f64>,
    pub p_value: f64,
    pub dof: usize,
}

impl ChiSquareTest {
    fn degenerate() -> Self {
        ChiSquareTest {
            statistic: None,
            p_value: 1.0,
            dof: 0,
        }
    }
}

/// `A, C, G, T` counts at every position of equal-length sequences. The
/// length is taken from the first sequence; others are skipped.
pub fn positional_counts<S: AsRef<str>>(sequences: &[S]) -> Vec<[f64; 4]> {
    let Some(first) = sequences.first() else {
        return Vec::new();
    };
    let length = first.as_ref().len();
    let mut counts = vec![[0.0; 4]; length];
    let mut skipped = 0;

    for sequence in sequences {
        let sequence = sequence.as_ref().as_bytes();
        if sequence.len() != length {
            skipped += 1;
            continue;
        }
        for (position, base) in sequence.iter().enumerate() {
            if let Some(column) = NUCLEOTIDES
                .iter()
                .position(|n| *n == base.to_ascii_uppercase())
            {
                counts[position][column] += 1.0;
            }
        }
    }
    if skipped > 0 {
        warn!("⚠️  {skipped} contexts differ from length {length} and were skipped");
    }
    counts
}

/// Pearson chi-square test of independence on an r×c table. Yates'
/// correction is applied when the table has one degree of freedom.
pub fn chi2_contingency(table: &[Vec<f64>]) -> ChiSquareTest {
    let rows = table.len();
    let cols = table.first().map_or(0, |r| r.len());
    if rows == 0 || cols == 0 || table.iter().any(|r| r.len() != cols) {
        return ChiSquareTest::degenerate();
    }

    let row_sums: Vec<f64> = table.iter().map(|r| r.iter().sum()).collect();
    let col_sums: Vec<f64> = (0..cols).map(|c| table.iter().map(|r| r[c]).sum()).collect();
    let total: f64 = row_sums.iter().sum();
    if total <= 0.0 {
        return ChiSquareTest::degenerate();
    }

    let dof = (rows - 1) * (cols - 1);
    if dof == 0 {
        return ChiSquareTest {
            statistic: Some(0.0),
            p_value: 1.0,
            dof,
        };
    }

    let mut statistic = 0.0;
    for (r, row) in table.iter().enumerate() {
        for (c, observed) in row.iter().enumerate() {
            let expected = row_sums[r] * col_sums[c] / total;
            if expected <= 0.0 {
                return ChiSquareTest::degenerate();
            }
            let mut diff = (observed - expected).abs();
            if dof == 1 {
                diff = (diff - 0.5).max(0.0);
            }
            statistic += diff * diff / expected;
        }
    }

    ChiSquareTest {
        statistic: Some(statistic),
        p_value: chi2_survival(statistic, dof as f64),
        dof,
    }
}

/// Upper tail probability of the chi-square distribution.
pub fn chi2_survival(x: f64, dof: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    regularized_gamma_q(dof / 2.0, x / 2.0)
}

fn ln_gamma(x: f64) -> f64 {
    // Lanczos approximation, g = 7
    const COEFFICIENTS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut sum = COEFFICIENTS[0];
    for (i, c) in COEFFICIENTS.iter().enumerate().skip(1) {
        sum += c / (x + i as f64);
    }
    let t = x + 7.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + sum.ln()
}

fn regularized_gamma_q(a: f64, x: f64) -> f64 {
    const EPS: f64 = 1e-15;
    const MAX_ITER: usize = 500;
    let log_prefix = a * x.ln() - x - ln_gamma(a);

    if x < a + 1.0 {
        // series for P(a, x)
        let mut term = 1.0 / a;
        let mut sum = term;
        let mut n = a;
        for _ in 0..MAX_ITER {
            n += 1.0;
            term *= x / n;
            sum += term;
            if term.abs() < sum.abs() * EPS {
                break;
            }
        }
        (1.0 - sum * log_prefix.exp()).clamp(0.0, 1.0)
    } else {
        // modified Lentz continued fraction for Q(a, x)
        let tiny = f64::MIN_POSITIVE / EPS;
        let mut b = x + 1.0 - a;
        let mut c = 1.0 / tiny;
        let mut d = 1.0 / b;
        let mut h = d;
        for i in 1..=MAX_ITER {
            let an = -(i as f64) * (i as f64 - a);
            b += 2.0;
            d = an * d + b;
            if d.abs() < tiny {
                d = tiny;
            }
            c = b + an / c;
            if c.abs() < tiny {
                c = tiny;
            }
            d = 1.0 / d;
            let delta = d * c;
            h *= delta;
            if (delta - 1.0).abs() < EPS {
                break;
            }
        }
        (log_prefix.exp() * h).clamp(0.0, 1.0)
    }
}

/// Benjamini–Hochberg adjusted p-values, returned in input order.
pub fn benjamini_hochberg(p_values: &[f64]) -> Vec<f64> {
    let n = p_values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

    let mut adjusted = vec![0.0; n];
    let mut running_min: f64 = 1.0;
    for (rank, &index) in order.iter().enumerate().rev() {
        let candidate = p_values[index] * n as f64 / (rank + 1) as f64;
        running_min = running_min.min(candidate);
        adjusted[index] = running_min;
    }
    adjusted
}

/// Test result at one context position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionTest {
    pub test: ChiSquareTest,
    pub p_adjusted: f64,
}

/// Compare nucleotide composition of two context sets position by position.
pub fn positional_chi2<S: AsRef<str>>(benign: &[S], pathogenic: &[S]) -> Vec<PositionTest> {
    let benign_counts = positional_counts(benign);
    let pathogenic_counts = positional_counts(pathogenic);
    let length = benign_counts.len().min(pathogenic_counts.len());

    let tests: Vec<ChiSquareTest> = (0..length)
        .map(|i| chi2_contingency(&[pathogenic_counts[i].to_vec(), benign_counts[i].to_vec()]))
        .collect();
    let p_values: Vec<f64> = tests.iter().map(|t| t.p_value).collect();

    tests
        .into_iter()
        .zip(benjamini_hochberg(&p_values))
        .map(|(test, p_adjusted)| PositionTest { test, p_adjusted })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tolerance: f64) -> bool {
        (a - b).abs() < tolerance
    }

    #[test]
    fn test_chi2_survival_known_values() {
        // df=1: P(X > 3.841459) = 0.05
        assert!(close(chi2_survival(3.841459, 1.0), 0.05, 1e-6));
        // df=3: P(X > 7.814728) = 0.05
        assert!(close(chi2_survival(7.814728, 3.0), 0.05, 1e-6));
        assert!(close(chi2_survival(2.0, 2.0), (-1.0f64).exp(), 1e-12));
        assert_eq!(chi2_survival(0.0, 3.0), 1.0);
    }

    #[test]
    fn test_contingency_2x4() {
        let table = vec![vec![10.0, 20.0, 30.0, 40.0], vec![25.0, 25.0, 25.0, 25.0]];
        let result = chi2_contingency(&table);
        assert_eq!(result.dof, 3);
        let expected = [17.5, 22.5, 27.5, 32.5];
        let statistic: f64 = table
            .iter()
            .flat_map(|row| row.iter().zip(expected.iter()))
            .map(|(o, e)| (o - e) * (o - e) / e)
            .sum();
        assert!(close(result.statistic.unwrap(), statistic, 1e-9));
        assert!(result.p_value > 0.0 && result.p_value < 0.05);
    }

    #[test]
    fn test_degenerate_column_gives_neutral_p() {
        let table = vec![vec![5.0, 0.0, 3.0, 2.0], vec![4.0, 0.0, 1.0, 6.0]];
        let result = chi2_contingency(&table);
        assert_eq!(result.statistic, None);
        assert_eq!(result.p_value, 1.0);
    }

    #[test]
    fn test_benjamini_hochberg() {
        let adjusted = benjamini_hochberg(&[0.01, 0.04, 0.03, 0.5]);
        let expected = [0.04, 0.0533333333, 0.0533333333, 0.5];
        for (a, e) in adjusted.iter().zip(expected) {
            assert!(close(*a, e, 1e-8), "{a} != {e}");
        }
        assert!(benjamini_hochberg(&[]).is_empty());
    }

    #[test]
    fn test_positional_chi2_keeps_full_length() {
        let benign = ["ACG", "AAG", "ATG", "AGG"];
        let pathogenic = ["ACG", "AGG", "ATG", "AAG", "TT"];
        let tests = positional_chi2(&benign[..], &pathogenic[..]);
        assert_eq!(tests.len(), 3);
        // only A at position 0 in every context
        assert_eq!(tests[0].test.p_value, 1.0);
        assert_eq!(tests[2].test.statistic, None);
        assert_eq!(tests[1].test.statistic, Some(0.0));
        assert!(tests.iter().all(|t| t.p_adjusted <= 1.0));
    }
}
