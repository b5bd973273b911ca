mod adapter;
mod app;
mod helpers;
