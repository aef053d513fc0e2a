pub mod analysis_cache;
