mod common;

mod documents;
mod persistence;
