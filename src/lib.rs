//! Clinic appointment management: public doctor directory, patient booking
//! and the staff panel, served over HTTP.

pub mod access;
pub mod app;
pub mod booking;
pub mod config;
pub mod db;
pub mod error;
pub mod forms;
pub mod handlers;
pub mod models;
pub mod panel;
pub mod reporting;
pub mod store;
pub mod views;
