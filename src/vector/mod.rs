//! Algorithms that search for local minima of functions along multiple dimensions.

mod line_search;
pub use self::line_search::{LineSearch, LineSearchBuilder, LineSearchResult};

mod seed;
pub use self::seed::seed_state;

mod migrad;
pub use self::migrad::{Migrad, MigradBuilder};

mod simplex;
pub use self::simplex::{Simplex, SimplexBuilder};
