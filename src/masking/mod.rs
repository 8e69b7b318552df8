use rand::RngCore;

/// Output of a corruption pass over one flattened series.
///
/// Missing values (NaN) in `original` and `corrupted` are replaced by `0.0`;
/// the masks carry the missingness instead.
#[derive(Debug, Clone, PartialEq)]
pub struct Corrupted {
    pub original: Vec<f32>,
    pub corrupted: Vec<f32>,
    /// 1 where `corrupted` holds an observed value.
    pub observed_mask: Vec<f32>,
    /// 1 where the value was observed in `original` but hidden in `corrupted`.
    pub artificial_mask: Vec<f32>,
}

impl Corrupted {
    pub fn observed_count(&self) -> usize {
        self.observed_mask.iter().filter(|&&m| m == 1.0).count()
    }

    pub fn artificial_count(&self) -> usize {
        self.artificial_mask.iter().filter(|&&m| m == 1.0).count()
    }
}

/// Hides a fraction of the observed values of a series.
pub trait Corruptor: Send + Sync {
    fn corrupt(&self, values: &[f32], rate: f64, rng: &mut dyn RngCore) -> Corrupted;
}

/// Missing-completely-at-random corruption.
///
/// `rate` is relative to the observed values, not the total size: with 100
/// values of which 40 are NaN and `rate = 0.5`, 30 values get hidden.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mcar;

impl Corruptor for Mcar {
    fn corrupt(&self, values: &[f32], rate: f64, rng: &mut dyn RngCore) -> Corrupted {
        let observed = values
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_nan())
            .map(|(i, _)| i)
            .collect::<Vec<usize>>();

        let amount = ((observed.len() as f64 * rate) as usize).min(observed.len());
        let picked = rand::seq::index::sample(
            rng, //
            observed.len(),
            amount,
        );

        let mut corrupted = values.to_vec();
        for i in picked.iter() {
            corrupted[observed[i]] = f32::NAN;
        }

        let observed_mask = corrupted
            .iter()
            .map(|v| indicator(!v.is_nan()))
            .collect();

        let artificial_mask = values
            .iter()
            .zip(corrupted.iter())
            .map(|(before, after)| indicator(before.is_nan() != after.is_nan()))
            .collect();

        Corrupted {
            original: values.iter().map(|&v| nan_to_zero(v)).collect(),
            corrupted: corrupted.into_iter().map(nan_to_zero).collect(),
            observed_mask,
            artificial_mask,
        }
    }
}

fn indicator(flag: bool) -> f32 {
    if flag { 1.0 } else { 0.0 }
}

fn nan_to_zero(v: f32) -> f32 {
    if v.is_nan() { 0.0 } else { v }
}
