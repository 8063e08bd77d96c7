pub mod api;
pub mod cipher;
pub mod common;
pub mod db;
pub mod mongodb;
pub mod otp;
