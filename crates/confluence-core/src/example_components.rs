//! Dummy components used by the test-suite.
//!
//! Their transfer equations are algebraic rather than physical, chosen so
//! that coupled runs have closed-form expected values. The water-cycle
//! trio couples through transfers i..o, the nutrient trio through
//! transfers a..h, and `transfer_p` links the two cycles as an optional
//! inward of the nutrient open water component.

#![allow(dead_code)]

use ndarray::{Array2, ArrayD, Axis, Ix2};

use crate::component::{
    Category, Component, ComponentDefinition, ConstantSpec, Divisions, FinaliseContext,
    InitialiseContext, InputSpec, InwardSpec, OutputSpec, OutwardSpec, ParameterSpec, RunContext,
    RunOutput, StateSpec, TransferMethod,
};
use crate::data::ClimatologyFrequency;
use crate::errors::ConfluenceResult;

fn as_grid(value: &ArrayD<f64>) -> Array2<f64> {
    value
        .to_owned()
        .into_dimensionality::<Ix2>()
        .expect("state is grid-shaped")
}

/// First corner slice of a state carrying two division axes.
fn corner(value: &ArrayD<f64>) -> Array2<f64> {
    value
        .index_axis(Axis(3), 0)
        .index_axis(Axis(2), 0)
        .to_owned()
        .into_dimensionality::<Ix2>()
        .expect("state divisions leave a grid-shaped slice")
}

/// Surface layer dummy: two counters for states, routed output, transfers
/// built from its driving data and the returns of the other two
/// components.
#[derive(Debug, Default)]
pub struct DummySurfaceLayer;

impl Component for DummySurfaceLayer {
    fn definition(&self) -> ComponentDefinition {
        let mut definition = ComponentDefinition::new(Category::SurfaceLayer);
        definition.inwards = vec![
            InwardSpec::new("transfer_k", "1", Category::SubSurface, TransferMethod::Mean),
            InwardSpec::new("transfer_l", "1", Category::OpenWater, TransferMethod::Mean),
            InwardSpec::new("transfer_n", "1", Category::OpenWater, TransferMethod::Mean),
            InwardSpec::new(
                "transfer_h",
                "1",
                Category::NutrientSurfaceLayer,
                TransferMethod::Mean,
            )
            .optional(),
        ];
        definition.outwards = vec![
            OutwardSpec::new("transfer_i", "1", &[Category::SubSurface], TransferMethod::Mean),
            OutwardSpec::new("transfer_j", "1", &[Category::OpenWater], TransferMethod::Mean),
        ];
        definition.inputs = vec![
            InputSpec::dynamic("driving_a", "1"),
            InputSpec::dynamic("driving_b", "1"),
            InputSpec::dynamic("driving_c", "1"),
            InputSpec::static_("ancillary_c", "1"),
        ];
        definition.states = vec![StateSpec::new("state_a", "1"), StateSpec::new("state_b", "1")];
        definition.outputs = vec![OutputSpec::new("output_x", "1")];
        definition.requires_land_sea_mask = true;
        definition.requires_flow_direction = true;
        definition
    }

    fn initialise(&mut self, ctx: InitialiseContext) -> ConfluenceResult<()> {
        if !ctx.initialised_states {
            ctx.states.get_mut("state_a").fill_timestep(-1, 0.0);
            ctx.states.get_mut("state_b").fill_timestep(-1, 0.0);
        }
        Ok(())
    }

    fn run(&mut self, ctx: RunContext) -> ConfluenceResult<RunOutput> {
        let state_a = ctx.states.get("state_a").get_timestep(-1) + 1.0;
        let state_b = ctx.states.get("state_b").get_timestep(-1) + 2.0;
        ctx.states.get_mut("state_a").set_timestep(0, &state_a);
        ctx.states.get_mut("state_b").set_timestep(0, &state_b);
        let state_a = as_grid(&state_a);
        let state_b = as_grid(&state_b);

        let driving_a = ctx.inputs.get("driving_a");
        let driving_b = ctx.inputs.get("driving_b");
        let driving_c = ctx.inputs.get("driving_c");
        let ancillary_c = ctx.inputs.get("ancillary_c");
        let transfer_k = ctx.inwards.get("transfer_k");
        let transfer_l = ctx.inwards.get("transfer_l");
        let transfer_n = ctx.inwards.get("transfer_n");

        let (output_x, _) = ctx
            .grid
            .route(&(&(&(driving_a + driving_b) + driving_c) + transfer_n - &state_a))?;

        let mut output = RunOutput::default();
        output.outwards.insert(
            "transfer_i".to_string(),
            &(driving_a + driving_b) + transfer_l + &(ancillary_c * &state_a),
        );
        output.outwards.insert(
            "transfer_j".to_string(),
            &(&(driving_a + driving_b) + driving_c) + transfer_k + &state_b,
        );
        output.outputs.insert("output_x".to_string(), output_x);
        Ok(output)
    }

    fn finalise(&mut self, _ctx: FinaliseContext) -> ConfluenceResult<()> {
        Ok(())
    }
}

/// Subsurface dummy.
#[derive(Debug, Default)]
pub struct DummySubSurface;

impl Component for DummySubSurface {
    fn definition(&self) -> ComponentDefinition {
        let mut definition = ComponentDefinition::new(Category::SubSurface);
        definition.inwards = vec![
            InwardSpec::new("transfer_i", "1", Category::SurfaceLayer, TransferMethod::Mean),
            InwardSpec::new("transfer_n", "1", Category::OpenWater, TransferMethod::Mean),
        ];
        definition.outwards = vec![
            OutwardSpec::new("transfer_k", "1", &[Category::SurfaceLayer], TransferMethod::Mean),
            OutwardSpec::new("transfer_m", "1", &[Category::OpenWater], TransferMethod::Mean),
        ];
        definition.inputs = vec![InputSpec::dynamic("driving_a", "1")];
        definition.parameters = vec![ParameterSpec::new("parameter_a", "1")];
        definition.states = vec![StateSpec::new("state_a", "1"), StateSpec::new("state_b", "1")];
        definition.outputs = vec![OutputSpec::new("output_x", "1")];
        definition
    }

    fn initialise(&mut self, ctx: InitialiseContext) -> ConfluenceResult<()> {
        if !ctx.initialised_states {
            ctx.states.get_mut("state_a").fill_timestep(-1, 0.0);
            ctx.states.get_mut("state_b").fill_timestep(-1, 0.0);
        }
        Ok(())
    }

    fn run(&mut self, ctx: RunContext) -> ConfluenceResult<RunOutput> {
        let state_a = ctx.states.get("state_a").get_timestep(-1) + 1.0;
        let state_b = ctx.states.get("state_b").get_timestep(-1) + 2.0;
        ctx.states.get_mut("state_a").set_timestep(0, &state_a);
        ctx.states.get_mut("state_b").set_timestep(0, &state_b);
        let state_a = as_grid(&state_a);
        let state_b = as_grid(&state_b);

        let driving_a = ctx.inputs.get("driving_a");
        let parameter_a = ctx.parameters.get("parameter_a");
        let transfer_i = ctx.inwards.get("transfer_i");
        let transfer_n = ctx.inwards.get("transfer_n");
        let forced = driving_a * parameter_a;

        let mut output = RunOutput::default();
        output
            .outwards
            .insert("transfer_k".to_string(), &forced + transfer_n + &state_a);
        output
            .outwards
            .insert("transfer_m".to_string(), &forced + transfer_i + &state_b);
        output
            .outputs
            .insert("output_x".to_string(), &forced + transfer_n - &state_a);
        Ok(output)
    }

    fn finalise(&mut self, _ctx: FinaliseContext) -> ConfluenceResult<()> {
        Ok(())
    }
}

/// Open water dummy, carrying a state stratified over two division axes
/// (the second sized by its constant).
#[derive(Debug, Default)]
pub struct DummyOpenWater;

impl Component for DummyOpenWater {
    fn definition(&self) -> ComponentDefinition {
        let mut definition = ComponentDefinition::new(Category::OpenWater);
        definition.inwards = vec![
            InwardSpec::new("transfer_j", "1", Category::SurfaceLayer, TransferMethod::Mean),
            InwardSpec::new("transfer_m", "1", Category::SubSurface, TransferMethod::Mean),
        ];
        definition.outwards = vec![
            OutwardSpec::new("transfer_l", "1", &[Category::SurfaceLayer], TransferMethod::Mean),
            OutwardSpec::new(
                "transfer_n",
                "1",
                &[Category::SurfaceLayer, Category::SubSurface],
                TransferMethod::Mean,
            ),
            OutwardSpec::new("transfer_o", "1", &[Category::Ocean], TransferMethod::Mean),
        ];
        definition.inputs = vec![InputSpec::climatologic(
            "ancillary_b",
            "1",
            ClimatologyFrequency::Monthly,
        )];
        definition.parameters = vec![ParameterSpec::new("parameter_c", "1")];
        definition.constants = vec![ConstantSpec::new("constant_c", "1", 3.0)];
        definition.states = vec![StateSpec::new("state_a", "1").with_divisions(vec![
            Divisions::Fixed(4),
            Divisions::Constant("constant_c".to_string()),
        ])];
        definition.outputs = vec![
            OutputSpec::new("output_x", "1"),
            OutputSpec::new("output_y", "1"),
        ];
        definition
    }

    fn initialise(&mut self, ctx: InitialiseContext) -> ConfluenceResult<()> {
        if !ctx.initialised_states {
            ctx.states.get_mut("state_a").fill_timestep(-1, 0.0);
        }
        Ok(())
    }

    fn run(&mut self, ctx: RunContext) -> ConfluenceResult<RunOutput> {
        let state_a = ctx.states.get("state_a").get_timestep(-1) + 1.0;
        ctx.states.get_mut("state_a").set_timestep(0, &state_a);
        let state_a = corner(&state_a);

        let ancillary_b = ctx.inputs.get("ancillary_b");
        let parameter_c = ctx.parameters.get("parameter_c");
        let constant_c = ctx.constants.get("constant_c");
        let transfer_j = ctx.inwards.get("transfer_j");
        let transfer_m = ctx.inwards.get("transfer_m");

        let mut output = RunOutput::default();
        output.outwards.insert(
            "transfer_l".to_string(),
            &(ancillary_b * transfer_m) + &state_a,
        );
        output
            .outwards
            .insert("transfer_n".to_string(), parameter_c * transfer_j);
        output
            .outwards
            .insert("transfer_o".to_string(), transfer_j + constant_c);
        output.outputs.insert(
            "output_x".to_string(),
            &(parameter_c * transfer_j) + constant_c,
        );
        output.outputs.insert(
            "output_y".to_string(),
            &(ancillary_b * transfer_m) - &state_a,
        );
        Ok(output)
    }

    fn finalise(&mut self, _ctx: FinaliseContext) -> ConfluenceResult<()> {
        Ok(())
    }
}

/// Nutrient surface layer dummy.
#[derive(Debug, Default)]
pub struct DummyNutrientSurfaceLayer;

impl Component for DummyNutrientSurfaceLayer {
    fn definition(&self) -> ComponentDefinition {
        let mut definition = ComponentDefinition::new(Category::NutrientSurfaceLayer);
        definition.inwards = vec![
            InwardSpec::new(
                "transfer_c",
                "1",
                Category::NutrientSubSurface,
                TransferMethod::Mean,
            ),
            InwardSpec::new(
                "transfer_d",
                "1",
                Category::NutrientOpenWater,
                TransferMethod::Mean,
            ),
            InwardSpec::new(
                "transfer_f",
                "1",
                Category::NutrientOpenWater,
                TransferMethod::Mean,
            ),
        ];
        definition.outwards = vec![
            OutwardSpec::new(
                "transfer_a",
                "1",
                &[Category::NutrientSubSurface],
                TransferMethod::Mean,
            ),
            OutwardSpec::new(
                "transfer_b",
                "1",
                &[Category::NutrientOpenWater],
                TransferMethod::Mean,
            ),
            OutwardSpec::new("transfer_h", "1", &[Category::SurfaceLayer], TransferMethod::Mean),
        ];
        definition.inputs = vec![
            InputSpec::dynamic("driving_d", "1"),
            InputSpec::dynamic("driving_e", "1"),
            InputSpec::dynamic("driving_f", "1"),
            InputSpec::static_("ancillary_e", "1"),
        ];
        definition.states = vec![StateSpec::new("state_a", "1"), StateSpec::new("state_b", "1")];
        definition.outputs = vec![OutputSpec::new("output_x", "1")];
        definition.requires_land_sea_mask = true;
        definition.requires_flow_direction = true;
        definition
    }

    fn initialise(&mut self, ctx: InitialiseContext) -> ConfluenceResult<()> {
        if !ctx.initialised_states {
            ctx.states.get_mut("state_a").fill_timestep(-1, 0.0);
            ctx.states.get_mut("state_b").fill_timestep(-1, 0.0);
        }
        Ok(())
    }

    fn run(&mut self, ctx: RunContext) -> ConfluenceResult<RunOutput> {
        let state_a = ctx.states.get("state_a").get_timestep(-1) + 1.0;
        let state_b = ctx.states.get("state_b").get_timestep(-1) + 2.0;
        ctx.states.get_mut("state_a").set_timestep(0, &state_a);
        ctx.states.get_mut("state_b").set_timestep(0, &state_b);
        let state_a = as_grid(&state_a);
        let state_b = as_grid(&state_b);

        let driving_d = ctx.inputs.get("driving_d");
        let driving_e = ctx.inputs.get("driving_e");
        let driving_f = ctx.inputs.get("driving_f");
        let ancillary_e = ctx.inputs.get("ancillary_e");
        let transfer_c = ctx.inwards.get("transfer_c");
        let transfer_d = ctx.inwards.get("transfer_d");
        let transfer_f = ctx.inwards.get("transfer_f");

        let (output_x, _) = ctx
            .grid
            .route(&(&(&(driving_d + driving_e) + driving_f) + transfer_f - &state_a))?;

        let mut output = RunOutput::default();
        output.outwards.insert(
            "transfer_a".to_string(),
            &(driving_d + driving_e) + transfer_d + &(ancillary_e * &state_a),
        );
        output.outwards.insert(
            "transfer_b".to_string(),
            &(&(driving_d + driving_e) + driving_f) + transfer_c + &state_b,
        );
        output
            .outwards
            .insert("transfer_h".to_string(), ancillary_e * &state_a);
        output.outputs.insert("output_x".to_string(), output_x);
        Ok(output)
    }

    fn finalise(&mut self, _ctx: FinaliseContext) -> ConfluenceResult<()> {
        Ok(())
    }
}

/// Nutrient subsurface dummy.
#[derive(Debug, Default)]
pub struct DummyNutrientSubSurface;

impl Component for DummyNutrientSubSurface {
    fn definition(&self) -> ComponentDefinition {
        let mut definition = ComponentDefinition::new(Category::NutrientSubSurface);
        definition.inwards = vec![
            InwardSpec::new(
                "transfer_a",
                "1",
                Category::NutrientSurfaceLayer,
                TransferMethod::Mean,
            ),
            InwardSpec::new(
                "transfer_f",
                "1",
                Category::NutrientOpenWater,
                TransferMethod::Mean,
            ),
        ];
        definition.outwards = vec![
            OutwardSpec::new(
                "transfer_c",
                "1",
                &[Category::NutrientSurfaceLayer],
                TransferMethod::Mean,
            ),
            OutwardSpec::new(
                "transfer_e",
                "1",
                &[Category::NutrientOpenWater],
                TransferMethod::Mean,
            ),
        ];
        definition.inputs = vec![InputSpec::dynamic("driving_d", "1")];
        definition.parameters = vec![ParameterSpec::new("parameter_d", "1")];
        definition.states = vec![StateSpec::new("state_a", "1"), StateSpec::new("state_b", "1")];
        definition.outputs = vec![OutputSpec::new("output_x", "1")];
        definition
    }

    fn initialise(&mut self, ctx: InitialiseContext) -> ConfluenceResult<()> {
        if !ctx.initialised_states {
            ctx.states.get_mut("state_a").fill_timestep(-1, 0.0);
            ctx.states.get_mut("state_b").fill_timestep(-1, 0.0);
        }
        Ok(())
    }

    fn run(&mut self, ctx: RunContext) -> ConfluenceResult<RunOutput> {
        let state_a = ctx.states.get("state_a").get_timestep(-1) + 1.0;
        let state_b = ctx.states.get("state_b").get_timestep(-1) + 2.0;
        ctx.states.get_mut("state_a").set_timestep(0, &state_a);
        ctx.states.get_mut("state_b").set_timestep(0, &state_b);
        let state_a = as_grid(&state_a);
        let state_b = as_grid(&state_b);

        let driving_d = ctx.inputs.get("driving_d");
        let parameter_d = ctx.parameters.get("parameter_d");
        let transfer_a = ctx.inwards.get("transfer_a");
        let transfer_f = ctx.inwards.get("transfer_f");
        let forced = driving_d * parameter_d;

        let mut output = RunOutput::default();
        output
            .outwards
            .insert("transfer_c".to_string(), &forced + transfer_f + &state_a);
        output
            .outwards
            .insert("transfer_e".to_string(), &forced + transfer_a + &state_b);
        output
            .outputs
            .insert("output_x".to_string(), &forced + transfer_f - &state_a);
        Ok(output)
    }

    fn finalise(&mut self, _ctx: FinaliseContext) -> ConfluenceResult<()> {
        Ok(())
    }
}

/// Nutrient open water dummy. Its `transfer_p` inward couples it to the
/// water cycle when the open water component produces one, and is zero
/// otherwise.
#[derive(Debug, Default)]
pub struct DummyNutrientOpenWater;

impl Component for DummyNutrientOpenWater {
    fn definition(&self) -> ComponentDefinition {
        let mut definition = ComponentDefinition::new(Category::NutrientOpenWater);
        definition.inwards = vec![
            InwardSpec::new(
                "transfer_b",
                "1",
                Category::NutrientSurfaceLayer,
                TransferMethod::Mean,
            ),
            InwardSpec::new(
                "transfer_e",
                "1",
                Category::NutrientSubSurface,
                TransferMethod::Mean,
            ),
            InwardSpec::new("transfer_p", "1", Category::OpenWater, TransferMethod::Mean)
                .optional(),
        ];
        definition.outwards = vec![
            OutwardSpec::new(
                "transfer_d",
                "1",
                &[Category::NutrientSurfaceLayer],
                TransferMethod::Mean,
            ),
            OutwardSpec::new(
                "transfer_f",
                "1",
                &[Category::NutrientSurfaceLayer, Category::NutrientSubSurface],
                TransferMethod::Mean,
            ),
            OutwardSpec::new("transfer_g", "1", &[Category::Ocean], TransferMethod::Mean),
        ];
        definition.inputs = vec![InputSpec::climatologic(
            "ancillary_d",
            "1",
            ClimatologyFrequency::Monthly,
        )];
        definition.parameters = vec![ParameterSpec::new("parameter_e", "1")];
        definition.constants = vec![ConstantSpec::new("constant_d", "1", 3.0)];
        definition.states = vec![StateSpec::new("state_a", "1").with_divisions(vec![
            Divisions::Fixed(4),
            Divisions::Constant("constant_d".to_string()),
        ])];
        definition.outputs = vec![
            OutputSpec::new("output_x", "1"),
            OutputSpec::new("output_y", "1"),
        ];
        definition
    }

    fn initialise(&mut self, ctx: InitialiseContext) -> ConfluenceResult<()> {
        if !ctx.initialised_states {
            ctx.states.get_mut("state_a").fill_timestep(-1, 0.0);
        }
        Ok(())
    }

    fn run(&mut self, ctx: RunContext) -> ConfluenceResult<RunOutput> {
        let state_a = ctx.states.get("state_a").get_timestep(-1) + 1.0;
        ctx.states.get_mut("state_a").set_timestep(0, &state_a);
        let state_a = corner(&state_a);

        let ancillary_d = ctx.inputs.get("ancillary_d");
        let parameter_e = ctx.parameters.get("parameter_e");
        let constant_d = ctx.constants.get("constant_d");
        let transfer_b = ctx.inwards.get("transfer_b");
        let transfer_e = ctx.inwards.get("transfer_e");
        let transfer_p = ctx.inwards.get("transfer_p");

        let mut output = RunOutput::default();
        output.outwards.insert(
            "transfer_d".to_string(),
            &(ancillary_d * transfer_e) + &state_a,
        );
        output
            .outwards
            .insert("transfer_f".to_string(), parameter_e * transfer_b);
        output
            .outwards
            .insert("transfer_g".to_string(), transfer_b + constant_d);
        output.outputs.insert(
            "output_x".to_string(),
            &(parameter_e * transfer_b) + constant_d,
        );
        output.outputs.insert(
            "output_y".to_string(),
            &(&(ancillary_d * transfer_e) - &state_a) + transfer_p,
        );
        Ok(output)
    }

    fn finalise(&mut self, _ctx: FinaliseContext) -> ConfluenceResult<()> {
        Ok(())
    }
}
