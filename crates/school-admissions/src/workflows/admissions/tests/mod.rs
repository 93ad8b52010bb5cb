mod booking;
mod common;
mod routing;
mod seats;
