pub mod detector;
pub mod poll;
pub mod precision;
pub mod price_table;
pub mod trader;
pub mod types;
pub mod venues;

#[cfg(test)]
mod tests;
