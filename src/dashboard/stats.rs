use std::collections::BTreeMap;

use crate::dataset::AdRecord;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spread {
    pub min: f64,
    pub mean: f64,
    pub median: f64,
    pub max: f64,
}

/// `None` for an empty slice.
pub fn spread(values: &[f64]) -> Option<Spread> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let median = if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    };
    Some(Spread {
        min: sorted[0],
        mean: sorted.iter().sum::<f64>() / n as f64,
        median,
        max: sorted[n - 1],
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub price: Option<Spread>,
    pub mileage: Option<Spread>,
    pub model_year: Option<Spread>,
    /// (brand, ads), most common first.
    pub brands: Vec<(String, usize)>,
}

pub fn summarize(rows: &[&AdRecord]) -> Summary {
    let prices: Vec<f64> = rows.iter().map(|r| r.price as f64).collect();
    let km: Vec<f64> = rows.iter().map(|r| r.mileage as f64).collect();
    let years: Vec<f64> = rows.iter().filter_map(|r| r.model_year.map(f64::from)).collect();

    let mut by_brand: BTreeMap<&str, usize> = BTreeMap::new();
    for r in rows {
        *by_brand.entry(r.brand.as_deref().unwrap_or("Unknown")).or_default() += 1;
    }
    let mut brands: Vec<(String, usize)> =
        by_brand.into_iter().map(|(b, n)| (b.to_string(), n)).collect();
    brands.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    Summary {
        count: rows.len(),
        price: spread(&prices),
        mileage: spread(&km),
        model_year: spread(&years),
        brands,
    }
}

/// Least-squares polynomial fit. x is centred and scaled before fitting so
/// high degrees over kilometre-sized values stay well conditioned.
#[derive(Debug, Clone, PartialEq)]
pub struct Trend {
    center: f64,
    scale: f64,
    coeffs: Vec<f64>,
}

impl Trend {
    /// Fit `points` with a polynomial of at most `degree`. The degree is
    /// lowered to fit the number of distinct x values; fewer than two distinct
    /// x values give no trend.
    pub fn fit(points: &[(f64, f64)], degree: usize) -> Option<Trend> {
        let mut xs: Vec<f64> = points.iter().map(|p| p.0).collect();
        xs.sort_by(f64::total_cmp);
        xs.dedup();
        if xs.len() < 2 {
            return None;
        }
        let degree = degree.min(xs.len() - 1);

        let center = points.iter().map(|p| p.0).sum::<f64>() / points.len() as f64;
        let scale = points
            .iter()
            .map(|p| (p.0 - center).abs())
            .fold(0.0, f64::max)
            .max(f64::EPSILON);

        // Normal equations: A c = b with A[i][j] = Σ t^(i+j), b[i] = Σ y t^i.
        let size = degree + 1;
        let mut a = vec![vec![0.0; size]; size];
        let mut b = vec![0.0; size];
        for &(x, y) in points {
            let t = (x - center) / scale;
            let powers: Vec<f64> = (0..2 * size).map(|k| t.powi(k as i32)).collect();
            for i in 0..size {
                b[i] += y * powers[i];
                for j in 0..size {
                    a[i][j] += powers[i + j];
                }
            }
        }

        let coeffs = solve(a, b)?;
        Some(Trend {
            center,
            scale,
            coeffs,
        })
    }

    pub fn degree(&self) -> usize {
        self.coeffs.len() - 1
    }

    pub fn eval(&self, x: f64) -> f64 {
        let t = (x - self.center) / self.scale;
        self.coeffs.iter().rev().fold(0.0, |acc, c| acc * t + c)
    }
}

/// Gaussian elimination with partial pivoting. `None` if singular.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let f = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= f * a[col][k];
            }
            b[row] -= f * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}
