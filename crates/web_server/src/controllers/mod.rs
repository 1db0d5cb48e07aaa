pub mod clustering;
pub mod image;
pub mod reconcile;
pub mod webserver_controller;
