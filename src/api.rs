pub mod metabase;
