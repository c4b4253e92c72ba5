#![warn(clippy::all, clippy::cargo, clippy::nursery, clippy::pedantic)]
#![warn(missing_docs)]

//! The crate `overlapmc` estimates the ratio of two integrals with [overlap sampling], also known
//! as the [Bennett acceptance ratio] method. Two Markov chains are run side by side, one sampling
//! a *reference* system whose integral is known and one sampling the *target* system, and the
//! ratio of their integrals is extracted from how much each chain's configurations overlap with
//! the other's weight.
//!
//! # Features
//!
//! - **Bring your own chains**. Anything implementing [`Ensemble`] can be sampled: the engine only
//! needs the sampled values and the ratio of the other system's weight to the chain's own weight
//! for the current configuration.
//! - **Reproducibility**. Chain choices are drawn from the random number generator handed to the
//! scheduler, so a run only depends on the chains and the chosen seed. Replicas started with
//! [`overlap::run_replicas`] draw from separate PCG streams and give the same merged result
//! regardless of how the threads are scheduled.
//! - **Non-finite number filtering**. Samples with `inf` or `nan` components are set to zero and
//! counted, so a single bad configuration does not destroy a long run.
//! - **Block averaging**. Statistical errors are computed from block means, which accounts for the
//! autocorrelation of Markov chains. The correlation of consecutive blocks is reported so that
//! too small blocks can be noticed.
//! - **Adaptive step split**. The fraction of super-steps spent in the reference chain is adjusted
//! during the run to minimize the final error per unit of computing time.
//! - **Bootstrap of the bias parameter**. [`overlap::ReferenceParameterBootstrap`] searches a wide
//! range of bias parameters with short pilot runs, narrows it down and stores the result for
//! later runs.
//!
//! # What is ...?
//!
//! This section is a dictionary of terms that are used in this documentation. Given the
//! reference integral $Q_0$ and the target integral $Q_1$ with weights $w_0$ and $w_1$, we write
//! $x = w_0 / w_1$ and estimate
//!
//! $$ \frac{Q_1}{Q_0} = \frac{\langle 1 / (1 + \alpha x) \rangle_0}{\langle x / (1 + \alpha x)
//! \rangle_1} $$
//!
//! where $\langle \cdot \rangle_i$ is the average in the chain that samples $w_i$. We use the
//! following terms:
//!
//! - the *bias parameter* is $\alpha$. Every value gives a correct estimate, but the error is
//! smallest close to $\alpha = Q_1 / Q_0$, which is found as the crossing of both overlap averages;
//! - the *alpha grid* is the geometrically spaced set of $\alpha$ values sampled simultaneously;
//! - the *weight ratio* $\gamma$ is what an [`Ensemble`] reports: the other system's weight over
//! its own weight, so $x = 1 / \gamma$ in the reference chain and $x = \gamma$ in the target chain;
//! - a *super-step* is a fixed number of steps of one chain, the *sub-steps*, each producing one
//! sample;
//! - the *step fraction* is the fraction of super-steps spent in the reference chain.
//!
//! [overlap sampling]: https://doi.org/10.1080/00268970701344906
//! [Bennett acceptance ratio]: https://en.wikipedia.org/wiki/Bennett_acceptance_ratio

pub mod accumulator;
pub mod callbacks;
pub mod core;
pub mod overlap;
pub mod report;

pub use crate::core::*;
