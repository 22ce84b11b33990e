pub mod aggregations;
