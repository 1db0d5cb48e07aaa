pub mod webserver;
