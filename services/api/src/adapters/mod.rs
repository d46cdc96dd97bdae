pub mod db;

pub use db::MongoAdapter;
