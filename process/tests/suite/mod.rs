mod group;
mod initializers;
mod launch;
mod support;
mod wait;
