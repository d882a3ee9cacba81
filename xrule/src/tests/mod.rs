// Shared fixtures
mod fixtures;

// Rule execution scenarios
mod rules;

// Cache behaviour
mod caching;
