//! Reading and writing delimited tables

mod csv;
mod results;

pub use self::csv::{detect_delimiter, format_value, read_count_matrix, write_count_matrix, write_matrix};
pub use results::{write_results, write_significant, DeResults, ResultsSummary};
