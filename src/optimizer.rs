//! Strategy parameter sweeps.
//!
//! The `Optimizer` replays every parameter combination against one shared candle series, in parallel
//! chunks. Each chunk owns its `Backtest`, reset between combinations, so runs share nothing but
//! the immutable candles.

use std::marker::PhantomData;
use std::sync::Arc;

use rayon::prelude::*;

use crate::config::BacktestOptions;
use crate::engine::{Backtest, Candle};
use crate::errors::Result;
use crate::portfolio::Portfolio;
use crate::strategy::Strategy;

/// Trait defining how to generate parameter combinations for optimization.
///
/// The associated type `Output` represents a single parameter combination (e.g., a tuple of values).
pub trait ParameterCombination: Sync {
    /// Type representing a single parameter combination (e.g., `(usize, f64)`).
    type Output: Clone + Send + Sync;

    /// Generates all the parameter combinations to test.
    fn generate() -> Vec<Self::Output>;
}

/// Runs a strategy once per parameter combination.
pub struct Optimizer<PC: ParameterCombination> {
    data: Arc<[Candle]>,
    options: BacktestOptions,
    _marker: PhantomData<PC>,
}

impl<PC: ParameterCombination> Optimizer<PC> {
    /// Creates a new `Optimizer`.
    ///
    /// ### Arguments
    /// * `data` - Candles shared by every run.
    /// * `options` - Pair, amount per order and initial holdings of every run.
    pub fn new(data: Arc<[Candle]>, options: BacktestOptions) -> Self {
        Self {
            data,
            options,
            _marker: PhantomData,
        }
    }

    /// Replays the strategy built by `build` for every combination.
    ///
    /// ### Returns
    /// Each combination with the portfolio of its run, in generation order.
    ///
    /// ### Errors
    /// The first error of `build`, of the engine or of the reporter.
    pub fn with<S, B>(&self, build: B) -> Result<Vec<(PC::Output, Portfolio)>>
    where
        S: Strategy + ?Sized,
        B: Fn(&PC::Output) -> Result<Box<S>> + Sync,
    {
        let combinations = PC::generate();
        let chunk_size = combinations.len().div_ceil(num_cpus::get()).max(1);
        tracing::debug!(combinations = combinations.len(), chunk_size, "starting sweep");

        combinations
            .par_chunks(chunk_size)
            .map::<_, Result<_>>(|par_combinations| {
                let mut backtest = Backtest::new(Arc::clone(&self.data), &self.options)?;
                let mut local_results = Vec::with_capacity(par_combinations.len());

                for param_set in par_combinations {
                    let mut strategy = build(param_set)?;
                    backtest.run(&mut strategy)?;
                    let portfolio = backtest.portfolio(strategy.name())?;
                    local_results.push((param_set.clone(), portfolio));
                    backtest.reset();
                }

                Ok(local_results)
            })
            .collect::<Result<Vec<_>>>()
            .map(|chunks| chunks.into_iter().flatten().collect())
    }
}

#[cfg(test)]
struct GridSteps;

#[cfg(test)]
impl ParameterCombination for GridSteps {
    type Output = (f64, f64);

    fn generate() -> Vec<Self::Output> {
        [0.5, 1.0, 2.0, 5.0]
            .into_iter()
            .flat_map(|grid| [1.0, 3.0, 10.0].into_iter().map(move |cancel| (grid, cancel)))
            .collect()
    }
}

#[cfg(test)]
fn get_data() -> Arc<[Candle]> {
    use crate::engine::CandleBuilder;
    use chrono::DateTime;

    let closes = [100.0, 101.5, 99.0, 97.0, 102.0, 104.0, 100.0, 96.0, 98.5, 103.0];
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            CandleBuilder::builder()
                .open(open)
                .high(open.max(close) + 1.5)
                .low(open.min(close) - 1.5)
                .close(close)
                .timestamp(DateTime::from_timestamp(1_672_531_200 + i as i64 * 3_600, 0).unwrap())
                .build()
                .unwrap()
        })
        .collect()
}

#[cfg(test)]
#[test]
fn optimizer_with_fixed_grid() {
    use crate::strategy::FixedGrid;

    let options = BacktestOptions::new("BTC/USDT", 10.0, 1_000.0, 1.0);
    let opt = Optimizer::<GridSteps>::new(get_data(), options.clone());

    let results = opt
        .with(|&(grid, cancel)| Ok(Box::new(FixedGrid::new(grid, cancel)?)))
        .unwrap();

    assert_eq!(results.len(), GridSteps::generate().len());
    for ((params, portfolio), expected) in results.iter().zip(GridSteps::generate()) {
        assert_eq!(*params, expected);
        assert_eq!(portfolio.prices.len(), 10);
        assert_eq!(
            portfolio.filled_orders + portfolio.canceled_orders + portfolio.open_orders,
            portfolio.orders.len()
        );
    }

    // a sweep run matches a standalone run with the same parameters
    let (params, swept) = &results[4];
    let mut strategy = FixedGrid::new(params.0, params.1).unwrap();
    let mut bts = Backtest::new(get_data(), &options).unwrap();
    bts.run(&mut strategy).unwrap();
    let standalone = bts.portfolio(strategy.name()).unwrap();
    assert_eq!(standalone.current_sum_amount, swept.current_sum_amount);
    assert_eq!(standalone.orders, swept.orders);
}

#[cfg(test)]
#[test]
fn optimizer_propagates_build_errors() {
    use crate::strategy::FixedGrid;

    let options = BacktestOptions::new("BTC/USDT", 10.0, 1_000.0, 1.0);
    let opt = Optimizer::<GridSteps>::new(get_data(), options);
    let result = opt.with(|&(_, cancel)| Ok(Box::new(FixedGrid::new(-1.0, cancel)?)));
    assert!(result.is_err());
}
